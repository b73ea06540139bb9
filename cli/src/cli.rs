use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Capability channel broker and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a broker serving the configured services
    Serve(ServeArgs),

    /// Send one command over a channel and print the response
    Call(CallArgs),

    /// Look a user up through the user directory service
    Getpwnam(GetpwnamArgs),

    /// Print the limits attached to a fresh channel
    Limits(LimitsArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct CallArgs {
    /// Command name, sent as `cmd`
    pub cmd: String,

    /// Request entries as KEY=VALUE (numbers and true/false are typed, the
    /// rest are strings)
    pub entries: Vec<String>,

    /// Open this service first and send the command to it
    #[arg(long, short = 's')]
    pub service: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct GetpwnamArgs {
    /// User name to look up
    pub name: String,

    /// Only return these fields (can be repeated)
    #[arg(long = "field", short = 'f')]
    pub fields: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct LimitsArgs {
    /// Ask a service channel instead of the broker
    #[arg(long, short = 's')]
    pub service: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Common arguments shared across subcommands
#[derive(Args)]
pub struct CommonArgs {
    /// Broker socket path
    #[arg(long, env = "TETHER_BROKER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Largest message accepted, in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,
}
