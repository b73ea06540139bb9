//! Capability channels
//!
//! A [`Channel`] owns one connected Unix stream socket to a peer service and
//! exchanges [`ValueList`]s over it. Channels come from the broker
//! ([`Channel::init`]), from an existing descriptor ([`Channel::wrap`]), from
//! another channel ([`Channel::try_clone`]), or from the service multiplexer
//! ([`Channel::service_open`]).
//!
//! Ownership follows the type system: [`Channel::close`] and
//! [`Channel::unwrap`] take the channel by value, [`Channel::xfer`] and
//! [`Channel::limit_set`] take the request list by value, and dropping a
//! channel closes its socket exactly once.
//!
//! Every operation blocks until the peer answers or the transport fails.
//! Nothing is retried here.

mod limits;
pub(crate) mod transport;

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{SockType, getsockopt, sockopt};

use crate::config::{ChannelConfig, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{Error, Result, peer_error};
use crate::vlist::{ListFlags, ValueList};

pub use limits::{Limits, is_subset, name_set};

/// How a channel came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Fresh connection to the broker
    Broker,
    /// Adopted from an existing descriptor
    Wrapped,
    /// Duplicated from another channel
    Cloned,
    /// Opened through the broker for a named service
    Service(String),
}

/// An owned, connected endpoint to a peer service
pub struct Channel {
    stream: UnixStream,
    flags: ListFlags,
    max_message_size: usize,
    origin: Origin,
    // One thread drives a channel at a time.
    _not_sync: PhantomData<Cell<()>>,
}

impl Channel {
    fn from_stream(stream: UnixStream, flags: ListFlags, origin: Origin) -> Self {
        Self {
            stream,
            flags,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            origin,
            _not_sync: PhantomData,
        }
    }

    /// Connect to the broker named by `TETHER_BROKER_SOCKET`, or the default
    /// socket path
    pub fn init() -> Result<Self> {
        Self::connect(&ChannelConfig::from_env())
    }

    /// Connect to the broker described by `config`
    pub fn connect(config: &ChannelConfig) -> Result<Self> {
        let path = config.broker_socket();
        let stream = UnixStream::connect(path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "broker unreachable");
            Error::Connection(e)
        })?;
        tracing::debug!(path = %path.display(), "connected to broker");

        let mut channel = Self::from_stream(stream, config.flags(), Origin::Broker);
        channel.max_message_size = config.max_message_size();
        Ok(channel)
    }

    /// Adopt an already-connected stream socket.
    ///
    /// The descriptor moves into the channel; on failure it is closed.
    pub fn wrap(fd: OwnedFd, flags: ListFlags) -> Result<Self> {
        Self::adopt(fd, flags, Origin::Wrapped)
    }

    pub(crate) fn adopt(fd: OwnedFd, flags: ListFlags, origin: Origin) -> Result<Self> {
        match getsockopt(&fd, sockopt::SockType) {
            Ok(SockType::Stream) => {}
            Ok(other) => {
                return Err(Error::Connection(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("expected a stream socket, got {other:?}"),
                )));
            }
            Err(errno) => return Err(errno.into()),
        }
        let channel = Self::from_stream(UnixStream::from(fd), flags, origin);
        tracing::debug!(fd = channel.stream.as_raw_fd(), origin = ?channel.origin, "channel opened");
        Ok(channel)
    }

    /// Give back the socket and flags without closing the socket
    pub fn unwrap(self) -> (OwnedFd, ListFlags) {
        tracing::debug!(fd = self.stream.as_raw_fd(), "channel unwrapped");
        (OwnedFd::from(self.stream), self.flags)
    }

    /// Close the channel's socket
    pub fn close(self) {
        tracing::debug!(fd = self.stream.as_raw_fd(), "channel closed");
    }

    /// Borrow the socket for inspection
    pub fn sock(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Flags given to lists built for this channel
    pub fn flags(&self) -> ListFlags {
        self.flags
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Name of the service this channel was opened for, if any
    pub fn service_name(&self) -> Option<&str> {
        match &self.origin {
            Origin::Service(name) => Some(name),
            _ => None,
        }
    }

    /// Limit the size of messages accepted from the peer
    pub fn set_max_message_size(&mut self, bytes: usize) {
        self.max_message_size = bytes;
    }

    /// An empty list carrying this channel's flags
    pub fn new_list(&self) -> ValueList {
        ValueList::with_flags(self.flags)
    }

    /// Send `list` to the peer; the caller keeps the list
    pub fn send(&self, list: &ValueList) -> Result<()> {
        transport::send_list(&self.stream, list)
    }

    /// Block until the peer sends a list.
    ///
    /// A message that arrives intact but fails to decode is returned as an
    /// errored list.
    pub fn recv(&self) -> Result<ValueList> {
        transport::recv_list(&self.stream, self.max_message_size)
    }

    /// Send `request` and wait for the response.
    ///
    /// `request` is consumed whether or not the exchange succeeds.
    pub fn xfer(&self, request: ValueList) -> Result<ValueList> {
        let sent = self.send(&request);
        drop(request);
        sent?;
        self.recv()
    }

    /// Run a broker-style command: exchange `request`, then check the
    /// response decoded and carries `error == 0`
    pub(crate) fn command(&self, request: ValueList) -> Result<ValueList> {
        let response = self.xfer(request)?.into_result()?;
        let errno = response.get_number("error")?;
        if errno != 0 {
            let errno = i32::try_from(errno)
                .map_err(|_| Error::protocol(format!("error number {errno} out of range")))?;
            return Err(peer_error(Errno::from_raw(errno)));
        }
        Ok(response)
    }

    fn request(&self, cmd: &str) -> ValueList {
        self.new_list().with("cmd", cmd)
    }

    /// Ask the peer for a second, independently owned channel to the same
    /// service. This channel stays usable whatever the outcome.
    pub fn try_clone(&self) -> Result<Channel> {
        let mut response = self.command(self.request("clone"))?;
        let fd = response.take_descriptor("sock")?;
        let origin = match &self.origin {
            Origin::Service(name) => Origin::Service(name.clone()),
            _ => Origin::Cloned,
        };
        let mut clone = Self::adopt(fd, self.flags, origin)?;
        clone.max_message_size = self.max_message_size;
        Ok(clone)
    }

    /// Open a channel scoped to the named service.
    ///
    /// The new channel does not depend on this one: either can be closed
    /// without affecting the other.
    pub fn service_open(&self, name: &str) -> Result<Channel> {
        let request = self.request("open").with("service", name);
        let mut response = self.command(request).map_err(|err| match err {
            Error::Peer(Errno::ENOENT) => Error::NoSuchService(name.to_string()),
            other => other,
        })?;

        let fd = response.take_descriptor("chan")?;
        let flags = u8::try_from(response.get_number("chanflags")?)
            .map(ListFlags::from_bits_truncate)
            .map_err(|_| Error::protocol("channel flags out of range"))?;

        let mut channel = Self::adopt(fd, flags, Origin::Service(name.to_string()))?;
        channel.max_message_size = self.max_message_size;
        tracing::debug!(service = name, "service channel opened");
        Ok(channel)
    }

    /// Restrict which services may be opened through this channel
    pub fn service_limit<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.limit_set(name_set(names))
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.sock()
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("fd", &self.stream.as_raw_fd())
            .field("flags", &self.flags)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_wrap_unwrap_keeps_socket_open() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::NO_UNIQUE).unwrap();
        let raw = channel.sock().as_raw_fd();
        assert_eq!(channel.origin(), &Origin::Wrapped);

        let (fd, flags) = channel.unwrap();
        assert_eq!(fd.as_raw_fd(), raw);
        assert_eq!(flags, ListFlags::NO_UNIQUE);

        // Still connected: the unwrapped socket talks to the peer.
        let peer = Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap();
        let again = Channel::wrap(fd, flags).unwrap();
        again.send(&ValueList::new().with("hello", true)).unwrap();
        assert!(peer.recv().unwrap().get_bool("hello").unwrap());
    }

    #[test]
    fn test_wrap_rejects_non_socket() {
        let file = tempfile::tempfile().unwrap();
        let err = Channel::wrap(OwnedFd::from(file), ListFlags::empty()).unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_send_keeps_list() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap();
        let peer = Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap();

        let list = ValueList::new().with("n", 1);
        channel.send(&list).unwrap();
        channel.send(&list).unwrap();
        assert_eq!(peer.recv().unwrap().get_number("n").unwrap(), 1);
        assert_eq!(peer.recv().unwrap().get_number("n").unwrap(), 1);
        assert_eq!(list.get_number("n").unwrap(), 1);
    }

    #[test]
    fn test_lookup_scenario() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap();

        let peer = thread::spawn(move || {
            let peer = Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap();
            let request = peer.recv().unwrap();
            assert_eq!(request.get_string("op").unwrap(), "lookup");
            assert_eq!(request.get_string("key").unwrap(), "alice");
            let response = ValueList::new()
                .with("found", true)
                .with("name", "alice")
                .with("uid", 1000);
            peer.send(&response).unwrap();
        });

        let request = ValueList::new().with("op", "lookup").with("key", "alice");
        channel.send(&request).unwrap();
        let response = channel.recv().unwrap();
        peer.join().unwrap();

        assert!(!response.is_errored());
        assert_eq!(response.len(), 3);
        assert!(response.get_bool("found").unwrap());
        assert_eq!(response.get_string("name").unwrap(), "alice");
        assert_eq!(response.get_number("uid").unwrap(), 1000);
    }

    #[test]
    fn test_xfer_consumes_on_failure() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap();
        let request = ValueList::new().with("cmd", "clone");
        let err = channel.xfer(request).unwrap_err();
        assert!(err.is_connection());
        // `request` has moved; using it again does not compile.
    }

    #[test]
    fn test_command_maps_peer_errors() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap();
        let peer = thread::spawn(move || {
            let peer = Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap();
            let _ = peer.recv().unwrap();
            peer.send(&ValueList::new().with("error", Errno::ENOENT as i32))
                .unwrap();
        });
        let err = channel.service_open("missing").unwrap_err();
        peer.join().unwrap();
        assert!(matches!(err, Error::NoSuchService(name) if name == "missing"));
    }

    #[test]
    fn test_command_rejects_garbage_response() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap();
        let peer = thread::spawn(move || {
            let peer = Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap();
            let _ = peer.recv().unwrap();
            peer.send(&ValueList::new().with("unexpected", "shape")).unwrap();
        });
        let err = channel.try_clone().unwrap_err();
        peer.join().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }
}
