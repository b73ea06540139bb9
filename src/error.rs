use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Result type for channel and value list operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sticky failure recorded on a [`ValueList`](crate::ValueList).
///
/// Once set, the list refuses every further operation except being dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    #[error("duplicate key")]
    DuplicateKey,

    #[error("invalid key")]
    InvalidKey,

    #[error("invalid value")]
    InvalidValue,

    #[error("malformed encoding")]
    Malformed,
}

/// Broad classification of [`Error`], for callers that only need to know
/// which side of the conversation went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker unreachable, peer gone, transport broken
    Connection,
    /// Malformed or unexpected message content, errored lists
    Protocol,
    /// The peer refused: unknown service or forbidden by limits
    Capability,
    /// Allocation or growth could not proceed
    Resource,
    /// A handle was used after ownership moved elsewhere
    Ownership,
    /// Invalid configuration
    Config,
}

/// Errors that can occur during channel operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("value list is in error state: {0}")]
    Errored(ListError),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key {key} holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("no such service: {0}")]
    NoSuchService(String),

    #[error("operation not permitted by channel limits")]
    NotCapable,

    #[error("peer reported error: {0}")]
    Peer(Errno),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("handle has been invalidated")]
    Invalidated,

    #[error("handle holds a {found}, expected a {expected}")]
    WrongHandle {
        expected: &'static str,
        found: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Protocol(_)
            | Error::Errored(_)
            | Error::KeyNotFound(_)
            | Error::TypeMismatch { .. }
            | Error::Peer(Errno::EINVAL) => ErrorKind::Protocol,
            Error::NoSuchService(_) | Error::NotCapable | Error::Peer(_) => ErrorKind::Capability,
            Error::Resource(_) => ErrorKind::Resource,
            Error::Invalidated | Error::WrongHandle { .. } => ErrorKind::Ownership,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the peer is gone or the transport broke
    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}

impl From<ListError> for Error {
    fn from(err: ListError) -> Self {
        Error::Errored(err)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::Connection(io::Error::from(errno))
    }
}

/// Errno a peer uses to refuse an operation its limits do not allow.
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
pub const NOT_CAPABLE: Errno = Errno::ENOTCAPABLE;

/// Errno a peer uses to refuse an operation its limits do not allow.
#[cfg(not(any(target_os = "freebsd", target_os = "dragonfly")))]
pub const NOT_CAPABLE: Errno = Errno::EPERM;

/// Map the `error` number of a peer response onto the crate error type
pub(crate) fn peer_error(errno: Errno) -> Error {
    if errno == NOT_CAPABLE {
        Error::NotCapable
    } else {
        Error::Peer(errno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let io_err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(io_err.kind(), ErrorKind::Connection);
        assert!(io_err.is_connection());

        assert_eq!(Error::Errored(ListError::Malformed).kind(), ErrorKind::Protocol);
        assert_eq!(Error::NoSuchService("x".into()).kind(), ErrorKind::Capability);
        assert_eq!(Error::Invalidated.kind(), ErrorKind::Ownership);
        assert_eq!(Error::Resource("oom".into()).kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_peer_error_mapping() {
        assert!(matches!(peer_error(NOT_CAPABLE), Error::NotCapable));
        assert!(matches!(peer_error(Errno::EINVAL), Error::Peer(Errno::EINVAL)));
    }

    #[test]
    fn test_rejected_request_is_protocol_class() {
        assert_eq!(peer_error(Errno::EINVAL).kind(), ErrorKind::Protocol);
        assert_eq!(peer_error(Errno::ENOMEM).kind(), ErrorKind::Capability);
        assert_eq!(peer_error(NOT_CAPABLE).kind(), ErrorKind::Capability);
    }

    #[test]
    fn test_errno_is_connection_class() {
        let err = Error::from(Errno::EPIPE);
        assert!(err.is_connection());
    }
}
