//! Owning handles for embedding in a scripting host
//!
//! A host language keeps native resources inside garbage-collected values
//! whose lifetime it controls, so moves cannot be checked at compile time.
//! [`Handle`] holds one resource in a single owning slot. Every operation
//! that hands the resource on empties the slot first; after that, reads fail
//! with [`Error::Invalidated`] and [`Handle::close`] does nothing.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::channel::{Channel, Limits};
use crate::error::{Error, Result};
use crate::vlist::{ListFlags, ValueList};

/// What a [`Handle`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    List,
    Channel,
    /// A channel opened for a named service
    Service,
    Descriptor,
}

impl HandleKind {
    fn name(self) -> &'static str {
        match self {
            HandleKind::List => "value list",
            HandleKind::Channel => "channel",
            HandleKind::Service => "service channel",
            HandleKind::Descriptor => "descriptor",
        }
    }
}

#[derive(Debug)]
enum HostObject {
    List(ValueList),
    Channel(Channel),
    Service(Channel),
    Descriptor(OwnedFd),
}

impl HostObject {
    fn kind(&self) -> HandleKind {
        match self {
            HostObject::List(_) => HandleKind::List,
            HostObject::Channel(_) => HandleKind::Channel,
            HostObject::Service(_) => HandleKind::Service,
            HostObject::Descriptor(_) => HandleKind::Descriptor,
        }
    }
}

/// A host-owned resource
#[derive(Debug)]
pub struct Handle {
    slot: Option<HostObject>,
}

impl Handle {
    fn new(object: HostObject) -> Self {
        Self { slot: Some(object) }
    }

    pub fn list(list: ValueList) -> Self {
        Self::new(HostObject::List(list))
    }

    /// Wrap a channel; service channels get [`HandleKind::Service`]
    pub fn channel(channel: Channel) -> Self {
        if channel.service_name().is_some() {
            Self::new(HostObject::Service(channel))
        } else {
            Self::new(HostObject::Channel(channel))
        }
    }

    pub fn descriptor(fd: OwnedFd) -> Self {
        Self::new(HostObject::Descriptor(fd))
    }

    /// What the handle holds, or `None` once invalidated
    pub fn kind(&self) -> Option<HandleKind> {
        self.slot.as_ref().map(HostObject::kind)
    }

    pub fn is_valid(&self) -> bool {
        self.slot.is_some()
    }

    /// Empty the slot. Dropping the returned resource releases it.
    fn invalidate(&mut self) -> Result<HostObject> {
        self.slot.take().ok_or(Error::Invalidated)
    }

    fn check_kind(&self, expected: HandleKind) -> Result<&HostObject> {
        let object = self.slot.as_ref().ok_or(Error::Invalidated)?;
        let found = object.kind();
        let matches = found == expected
            || (expected == HandleKind::Channel && found == HandleKind::Service);
        if matches {
            Ok(object)
        } else {
            Err(Error::WrongHandle {
                expected: expected.name(),
                found: found.name(),
            })
        }
    }

    pub fn as_list(&self) -> Result<&ValueList> {
        match self.check_kind(HandleKind::List)? {
            HostObject::List(list) => Ok(list),
            _ => Err(Error::Invalidated),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut ValueList> {
        self.check_kind(HandleKind::List)?;
        match self.slot.as_mut() {
            Some(HostObject::List(list)) => Ok(list),
            _ => Err(Error::Invalidated),
        }
    }

    /// Borrow the channel of a channel or service handle
    pub fn as_channel(&self) -> Result<&Channel> {
        match self.check_kind(HandleKind::Channel)? {
            HostObject::Channel(channel) | HostObject::Service(channel) => Ok(channel),
            _ => Err(Error::Invalidated),
        }
    }

    /// Move the list out, invalidating this handle
    pub fn take_list(&mut self) -> Result<ValueList> {
        self.check_kind(HandleKind::List)?;
        match self.invalidate()? {
            HostObject::List(list) => Ok(list),
            _ => Err(Error::Invalidated),
        }
    }

    /// Move the channel out, invalidating this handle
    pub fn take_channel(&mut self) -> Result<Channel> {
        self.check_kind(HandleKind::Channel)?;
        match self.invalidate()? {
            HostObject::Channel(channel) | HostObject::Service(channel) => Ok(channel),
            _ => Err(Error::Invalidated),
        }
    }

    /// Move the descriptor out, invalidating this handle
    pub fn take_descriptor(&mut self) -> Result<OwnedFd> {
        self.check_kind(HandleKind::Descriptor)?;
        match self.invalidate()? {
            HostObject::Descriptor(fd) => Ok(fd),
            _ => Err(Error::Invalidated),
        }
    }

    /// Release the resource now. Closing an invalidated handle does nothing.
    pub fn close(&mut self) {
        if let Some(object) = self.slot.take() {
            match object {
                HostObject::Channel(channel) | HostObject::Service(channel) => channel.close(),
                other => drop(other),
            }
        }
    }

    /// The raw descriptor of a channel or descriptor handle, for inspection
    pub fn sock(&self) -> Result<RawFd> {
        match self.slot.as_ref().ok_or(Error::Invalidated)? {
            HostObject::Channel(channel) | HostObject::Service(channel) => Ok(channel.as_raw_fd()),
            HostObject::Descriptor(fd) => Ok(fd.as_raw_fd()),
            HostObject::List(_) => Err(Error::WrongHandle {
                expected: HandleKind::Channel.name(),
                found: HandleKind::List.name(),
            }),
        }
    }

    /// Adopt the descriptor in `fd` as a channel.
    ///
    /// `fd` is invalidated even if the descriptor turns out not to be a
    /// usable socket, so the same descriptor can never back two channels.
    pub fn wrap(fd: &mut Handle, flags: ListFlags) -> Result<Handle> {
        let fd = fd.take_descriptor()?;
        Channel::wrap(fd, flags).map(Handle::channel)
    }

    /// Give the channel's socket back as a descriptor handle, invalidating
    /// this one
    pub fn unwrap(&mut self) -> Result<(Handle, ListFlags)> {
        let (fd, flags) = self.take_channel()?.unwrap();
        Ok((Handle::descriptor(fd), flags))
    }

    /// Send the list in `request` and return the response.
    ///
    /// `request` is invalidated before anything is sent.
    pub fn xfer(&self, request: &mut Handle) -> Result<Handle> {
        let channel = self.as_channel()?;
        let request = request.take_list()?;
        channel.xfer(request).map(Handle::list)
    }

    /// Send the list in `list`, which stays valid
    pub fn send(&self, list: &Handle) -> Result<()> {
        self.as_channel()?.send(list.as_list()?)
    }

    pub fn recv(&self) -> Result<Handle> {
        self.as_channel()?.recv().map(Handle::list)
    }

    /// Replace the channel's limits with the list in `limits`, invalidating it
    pub fn limit_set(&self, limits: &mut Handle) -> Result<()> {
        let channel = self.as_channel()?;
        let limits = limits.take_list()?;
        channel.limit_set(limits)
    }

    /// The channel's limits as a list handle, or `None` when none are set
    pub fn limit_get(&self) -> Result<Option<Handle>> {
        Ok(match self.as_channel()?.limit_get()? {
            Limits::Attached(list) => Some(Handle::list(list)),
            Limits::NoneAttached => None,
        })
    }

    pub fn try_clone(&self) -> Result<Handle> {
        self.as_channel()?.try_clone().map(Handle::channel)
    }

    pub fn service_open(&self, name: &str) -> Result<Handle> {
        self.as_channel()?.service_open(name).map(Handle::channel)
    }
}

impl From<ValueList> for Handle {
    fn from(list: ValueList) -> Self {
        Handle::list(list)
    }
}

impl From<Channel> for Handle {
    fn from(channel: Channel) -> Self {
        Handle::channel(channel)
    }
}

impl From<OwnedFd> for Handle {
    fn from(fd: OwnedFd) -> Self {
        Handle::descriptor(fd)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn test_wrap_invalidates_descriptor() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut fd = Handle::descriptor(OwnedFd::from(a));

        let channel = Handle::wrap(&mut fd, ListFlags::empty()).unwrap();
        assert_eq!(channel.kind(), Some(HandleKind::Channel));
        assert!(!fd.is_valid());
        assert!(matches!(
            Handle::wrap(&mut fd, ListFlags::empty()),
            Err(Error::Invalidated)
        ));
    }

    #[test]
    fn test_failed_wrap_still_invalidates() {
        let mut fd = Handle::descriptor(OwnedFd::from(tempfile::tempfile().unwrap()));
        assert!(Handle::wrap(&mut fd, ListFlags::empty()).is_err());
        assert!(!fd.is_valid());
    }

    #[test]
    fn test_xfer_invalidates_request() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let channel = Handle::channel(Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap());
        let mut request = Handle::list(ValueList::new().with("cmd", "clone"));

        assert!(channel.xfer(&mut request).unwrap_err().is_connection());
        assert!(matches!(request.as_list(), Err(Error::Invalidated)));
    }

    #[test]
    fn test_send_keeps_list_valid() {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Handle::channel(Channel::wrap(OwnedFd::from(a), ListFlags::empty()).unwrap());
        let peer = Handle::channel(Channel::wrap(OwnedFd::from(b), ListFlags::empty()).unwrap());

        let list = Handle::list(ValueList::new().with("n", 7));
        channel.send(&list).unwrap();
        assert!(list.is_valid());
        let received = peer.recv().unwrap();
        assert_eq!(received.as_list().unwrap().get_number("n").unwrap(), 7);
    }

    #[test]
    fn test_unwrap_and_close() {
        let (a, _b) = UnixStream::pair().unwrap();
        let raw = a.as_raw_fd();
        let mut channel =
            Handle::channel(Channel::wrap(OwnedFd::from(a), ListFlags::IGNORE_CASE).unwrap());

        let (mut fd, flags) = channel.unwrap().unwrap();
        assert_eq!(flags, ListFlags::IGNORE_CASE);
        assert_eq!(fd.sock().unwrap(), raw);
        assert!(matches!(channel.sock(), Err(Error::Invalidated)));

        channel.close();
        fd.close();
        fd.close();
        assert_eq!(fd.kind(), None);
    }

    #[test]
    fn test_wrong_kind_leaves_handle_intact() {
        let mut list = Handle::list(ValueList::new());
        assert!(matches!(
            list.take_channel(),
            Err(Error::WrongHandle { expected: "channel", found: "value list" })
        ));
        assert!(list.is_valid());
        list.as_list_mut().unwrap().insert("k", true).unwrap();
        assert!(list.as_list().unwrap().get_bool("k").unwrap());
    }
}
