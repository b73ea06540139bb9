//! Tether - capability channels over self-describing value lists
//!
//! A sandboxed process cannot open files, sockets or system databases
//! itself. Instead it holds [`Channel`]s: connected Unix sockets to peer
//! services running outside the sandbox, each of which answers requests
//! encoded as [`ValueList`]s and may be narrowed further with limits.
//!
//! - [`ValueList`] - typed key/value container with a sticky error state,
//!   encoded in the `nvlist` wire format
//! - [`Channel`] - owned endpoint with send/recv/xfer, cloning and limits
//! - [`Channel::service_open`] - the broker hands out per-service channels
//! - [`lookup`] - bounded-retry driver for buffer-sized record lookups
//! - [`UserDirectory`] - client for the `system.pwd` service
//! - [`service`] - the peer side, including an in-process [`Broker`]
//! - [`host`] - owning handles for embedding in a scripting host
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::{Channel, UserDirectory};
//!
//! fn home_of(name: &str) -> tether::Result<Option<String>> {
//!     let broker = Channel::init()?;
//!     let users = UserDirectory::open(&broker)?;
//!     // Nothing but user lookups from here on.
//!     broker.service_limit(&[] as &[&str])?;
//!     Ok(users.getpwnam(name)?.map(|user| user.dir))
//! }
//! ```
//!
//! # Limits
//!
//! Limits only ever narrow. Once a channel carries limits, a `limit_set`
//! that would allow more than before is refused with
//! [`Error::NotCapable`]:
//!
//! ```rust,ignore
//! use tether::UserDirectory;
//!
//! let users = UserDirectory::open(&broker)?;
//! users.limit_cmds(&["getpwnam"])?;
//! users.limit_fields(&["name", "uid", "dir"])?;
//! assert!(users.limit_cmds(&["getpwnam", "getpwuid"]).is_err());
//! ```

mod channel;
mod config;
mod directory;
mod error;
pub mod host;
pub mod lookup;
pub mod service;
mod vlist;

pub use channel::{Channel, Limits, Origin, is_subset, name_set};
pub use config::{
    BROKER_SOCKET_ENV, ChannelConfig, ChannelConfigBuilder, DEFAULT_BROKER_SOCKET,
    DEFAULT_MAX_MESSAGE_SIZE, LookupConfig, LookupConfigBuilder, page_size,
};
pub use directory::{User, UserDirectory, UserRef};
pub use error::{Error, ErrorKind, ListError, NOT_CAPABLE, Result};
pub use service::{Broker, BrokerServer, Service, ServiceRegistry, UserDbService};
pub use vlist::{ListFlags, NAME_MAX, Packed, Value, ValueList};

/// Names used by the user directory service
pub mod pwd {
    pub use crate::directory::{COMMANDS, FIELDS, SERVICE_NAME};
}

/// Re-export of the errno type carried in peer errors
pub use nix::errno::Errno;
