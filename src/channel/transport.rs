//! Framed transport for value lists
//!
//! A message is the packed list written to a connected Unix stream socket,
//! followed by the descriptors it references passed as `SCM_RIGHTS` control
//! messages, at most [`MAX_FDS_PER_MESSAGE`] per `sendmsg`, each with a
//! one-byte dummy payload.

use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr, recvmsg, sendmsg};

use crate::error::{Error, Result};
use crate::vlist::ValueList;
use crate::vlist::wire::{HEADER_SIZE, parse_header};

/// Descriptors carried by a single control message
pub(crate) const MAX_FDS_PER_MESSAGE: usize = 127;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: MsgFlags = MsgFlags::empty();

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

/// Write `list` and pass its descriptors to the peer
pub(crate) fn send_list(stream: &UnixStream, list: &ValueList) -> Result<()> {
    let packed = list.pack()?;

    let mut writer = stream;
    writer.write_all(&packed.bytes)?;
    if !packed.descriptors.is_empty() {
        send_descriptors(stream, &packed.descriptors)?;
    }

    tracing::trace!(
        len = packed.bytes.len(),
        descriptors = packed.descriptors.len(),
        "sent value list"
    );
    Ok(())
}

fn send_descriptors(stream: &UnixStream, descriptors: &[BorrowedFd<'_>]) -> Result<()> {
    let dummy = [0u8];
    for chunk in descriptors.chunks(MAX_FDS_PER_MESSAGE) {
        let raw: Vec<RawFd> = chunk.iter().map(AsRawFd::as_raw_fd).collect();
        let iov = [IoSlice::new(&dummy)];
        let cmsgs = [ControlMessage::ScmRights(&raw)];
        loop {
            match sendmsg::<UnixAddr>(stream.as_raw_fd(), &iov, &cmsgs, SEND_FLAGS, None) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }
    Ok(())
}

/// Block until a whole message has arrived.
///
/// Transport failures are errors; a body that fails to decode yields an
/// errored list.
pub(crate) fn recv_list(stream: &UnixStream, max_message_size: usize) -> Result<ValueList> {
    let mut reader = stream;

    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let info = parse_header(&header).map_err(|_| Error::protocol("invalid value list header"))?;

    let size = usize::try_from(info.size)
        .ok()
        .filter(|size| *size <= max_message_size.saturating_sub(HEADER_SIZE))
        .ok_or_else(|| Error::protocol(format!("message of {} bytes exceeds limit", info.size)))?;
    // Each descriptor is referenced by an 8-byte index in the body.
    let count = usize::try_from(info.descriptors)
        .ok()
        .filter(|count| *count <= size / 8)
        .ok_or_else(|| Error::protocol("descriptor count exceeds message size"))?;

    let mut buf = vec![0u8; HEADER_SIZE + size];
    buf[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[HEADER_SIZE..])?;

    let descriptors = recv_descriptors(stream, count)?;

    tracing::trace!(len = buf.len(), descriptors = count, "received value list");
    Ok(ValueList::unpack(&buf, descriptors))
}

fn recv_descriptors(stream: &UnixStream, count: usize) -> Result<Vec<OwnedFd>> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        let expected = (count - received.len()).min(MAX_FDS_PER_MESSAGE);
        let before = received.len();

        let mut dummy = [0u8];
        let mut iov = [IoSliceMut::new(&mut dummy)];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_MESSAGE]);
        let msg = loop {
            match recvmsg::<UnixAddr>(
                stream.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                RECV_FLAGS,
            ) {
                Ok(msg) => break msg,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        };

        if msg.bytes == 0 {
            return Err(Error::Connection(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let truncated = msg.flags.contains(MsgFlags::MSG_CTRUNC);
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                for fd in fds {
                    // SAFETY: the kernel just installed this descriptor for us
                    // and nothing else refers to it yet.
                    received.push(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
        }

        if truncated || received.len() - before != expected {
            return Err(Error::protocol(format!(
                "expected {expected} descriptors, received {}",
                received.len() - before
            )));
        }
    }
    Ok(received)
}
