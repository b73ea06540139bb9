use anyhow::Context;

use tether::{Channel, ChannelConfig, UserDirectory};

use crate::cli::GetpwnamArgs;
use crate::error::CliResult;

pub fn execute(args: GetpwnamArgs, config: ChannelConfig) -> CliResult<()> {
    let broker = Channel::connect(&config).context("failed to connect to broker")?;
    let users = UserDirectory::open(&broker)?;
    // The service channel does not need the broker channel any more.
    broker.close();

    if !args.fields.is_empty() {
        let fields: Vec<&str> = args.fields.iter().map(String::as_str).collect();
        users
            .limit_fields(&fields)
            .context("failed to restrict returned fields")?;
    }

    match users.getpwnam(&args.name)? {
        Some(user) => {
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        None => anyhow::bail!("no such user: {}", args.name),
    }
}
