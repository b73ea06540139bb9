use anyhow::Context;

use tether::{Broker, ChannelConfig, ServiceRegistry, User, UserDbService, pwd};

use crate::error::CliResult;

pub fn execute(config: ChannelConfig, users: Vec<User>) -> CliResult<()> {
    let user_count = users.len();
    let registry = ServiceRegistry::new().register(UserDbService::new(users));
    let broker = Broker::new(registry).with_max_message_size(config.max_message_size());

    let server = broker.bind(config.broker_socket()).with_context(|| {
        format!(
            "failed to listen on {}",
            config.broker_socket().display()
        )
    })?;
    tracing::info!(
        path = %server.socket_path().display(),
        service = pwd::SERVICE_NAME,
        users = user_count,
        "broker ready"
    );

    server.wait();
    Ok(())
}
