//! Broker server
//!
//! Each connection gets a [`Session`] on its own thread. A session starts
//! either at the broker (it can `open` services) or at one service, and
//! carries the limits set on that connection.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::socket::{Shutdown, shutdown};

use super::{Service, ServiceRegistry, check_name_set};
use crate::channel::{Channel, Origin, transport};
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Error, NOT_CAPABLE, Result};
use crate::vlist::{ListFlags, Value, ValueList};

/// Hands out channels to the services in its registry
#[derive(Debug, Clone)]
pub struct Broker {
    registry: Arc<ServiceRegistry>,
    max_message_size: usize,
}

impl Broker {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit the size of requests sessions accept
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    fn session(&self, stream: UnixStream) -> Session {
        Session {
            stream,
            registry: Arc::clone(&self.registry),
            service: None,
            limits: None,
            max_message_size: self.max_message_size,
        }
    }

    /// Start an in-process session and return a broker channel to it
    pub fn connect(&self) -> Result<Channel> {
        let (ours, theirs) = UnixStream::pair()?;
        self.session(theirs).spawn()?;
        let mut channel = Channel::adopt(OwnedFd::from(ours), ListFlags::empty(), Origin::Broker)?;
        channel.set_max_message_size(self.max_message_size);
        Ok(channel)
    }

    /// Listen on a Unix socket at `path`, serving each connection on its own
    /// thread until the returned server is stopped or dropped
    pub fn bind(&self, path: impl AsRef<Path>) -> Result<BrokerServer> {
        let socket_path = path.as_ref().to_path_buf();

        // A stale socket from an earlier run would make bind fail.
        let _ = std::fs::remove_file(&socket_path);
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!(path = %socket_path.display(), "broker listening");

        let running = Arc::new(AtomicBool::new(true));
        let broker = self.clone();
        let running_clone = Arc::clone(&running);
        let control = listener.try_clone()?;
        let accept = thread::Builder::new()
            .name("tether-accept".to_string())
            .spawn(move || broker.accept_loop(listener, running_clone))?;

        Ok(BrokerServer {
            socket_path,
            listener: control,
            running,
            accept: Some(accept),
        })
    }

    fn accept_loop(self, listener: UnixListener, running: Arc<AtomicBool>) {
        for stream in listener.incoming() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.session(stream).spawn() {
                        tracing::warn!(error = %e, "failed to start broker session");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to accept broker connection"),
            }
        }
    }
}

/// A broker listening on a Unix socket
#[derive(Debug)]
pub struct BrokerServer {
    socket_path: PathBuf,
    listener: UnixListener,
    running: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl BrokerServer {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting connections. Sessions already running continue until
    /// their clients hang up.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(path = %self.socket_path.display(), "broker stopping");

        // The accept loop only notices the flag once accept returns. Without
        // a socket file to connect to, shutting the listener down fails the
        // pending accept instead.
        let woke = UnixStream::connect(&self.socket_path).is_ok()
            || shutdown(self.listener.as_raw_fd(), Shutdown::Both).is_ok();
        if !woke {
            tracing::warn!(
                path = %self.socket_path.display(),
                "could not wake the accept loop, leaving it blocked"
            );
            return;
        }
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }

    /// Block until the accept loop exits
    pub fn wait(mut self) {
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.stop();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// One connection, served until the client hangs up
struct Session {
    stream: UnixStream,
    registry: Arc<ServiceRegistry>,
    /// `None` for broker sessions
    service: Option<Arc<dyn Service>>,
    limits: Option<ValueList>,
    max_message_size: usize,
}

impl Session {
    fn spawn(self) -> io::Result<()> {
        let name = match &self.service {
            Some(service) => format!("tether-{}", service.name()),
            None => "tether-broker".to_string(),
        };
        thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(())
    }

    fn service_name(&self) -> &str {
        self.service.as_ref().map_or("broker", |service| service.name())
    }

    fn run(mut self) {
        tracing::debug!(service = self.service_name(), "session started");
        loop {
            let request = match transport::recv_list(&self.stream, self.max_message_size) {
                Ok(request) => request,
                Err(Error::Connection(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    tracing::warn!(service = self.service_name(), error = %e, "failed to read request");
                    break;
                }
            };
            if let Some(err) = request.error() {
                tracing::warn!(service = self.service_name(), error = %err, "malformed request, closing session");
                break;
            }

            let flags = request.flags();
            let response = match self.handle(request) {
                Ok(mut response) => match response.insert("error", 0) {
                    Ok(()) => response,
                    Err(_) => error_response(flags, Errno::EINVAL),
                },
                Err(errno) => {
                    tracing::debug!(service = self.service_name(), %errno, "request refused");
                    error_response(flags, errno)
                }
            };

            if let Err(e) = transport::send_list(&self.stream, &response) {
                tracing::debug!(service = self.service_name(), error = %e, "failed to send response");
                break;
            }
        }
        tracing::debug!(service = self.service_name(), "session finished");
    }

    fn handle(&mut self, mut request: ValueList) -> std::result::Result<ValueList, Errno> {
        let cmd = request
            .get_string("cmd")
            .map_err(|_| Errno::EINVAL)?
            .to_string();
        let mut response = ValueList::with_flags(request.flags());

        match cmd.as_str() {
            "clone" => {
                let sock = self.clone_session()?;
                put(&mut response, "sock", sock)?;
            }
            "limit_get" => match &self.limits {
                Some(limits) => {
                    let limits = limits.try_clone().map_err(|_| Errno::ENOMEM)?;
                    put(&mut response, "limits", limits)?;
                }
                None => put(&mut response, "limits", Value::Null)?,
            },
            "limit_set" => self.limit_set(&mut request)?,
            "open" if self.service.is_none() => {
                let name = request.get_string("service").map_err(|_| Errno::EINVAL)?;
                let chan = self.open(name)?;
                put(&mut response, "chan", chan)?;
                put(&mut response, "chanflags", i64::from(request.flags().bits()))?;
            }
            _ => match &self.service {
                Some(service) => {
                    service.command(&cmd, self.limits.as_ref(), &request, &mut response)?
                }
                None => return Err(Errno::EINVAL),
            },
        }
        Ok(response)
    }

    fn limit_set(&mut self, request: &mut ValueList) -> std::result::Result<(), Errno> {
        if request.is_null("limits").map_err(|_| Errno::EINVAL)? {
            // Dropping limits would widen them.
            return match self.limits {
                Some(_) => Err(NOT_CAPABLE),
                None => Ok(()),
            };
        }
        let new = request.take_list("limits").map_err(|_| Errno::EINVAL)?;
        match &self.service {
            Some(service) => service.limit(self.limits.as_ref(), &new)?,
            None => check_name_set(self.limits.as_ref(), &new)?,
        }
        tracing::debug!(service = self.service_name(), limits = %new, "limits set");
        self.limits = Some(new);
        Ok(())
    }

    fn clone_session(&self) -> std::result::Result<OwnedFd, Errno> {
        let (ours, theirs) = UnixStream::pair().map_err(io_errno)?;
        let limits = self
            .limits
            .as_ref()
            .map(ValueList::try_clone)
            .transpose()
            .map_err(|_| Errno::ENOMEM)?;
        Session {
            stream: ours,
            registry: Arc::clone(&self.registry),
            service: self.service.clone(),
            limits,
            max_message_size: self.max_message_size,
        }
        .spawn()
        .map_err(io_errno)?;
        Ok(OwnedFd::from(theirs))
    }

    fn open(&self, name: &str) -> std::result::Result<OwnedFd, Errno> {
        if !self.limits.as_ref().is_none_or(|limits| limits.contains(name)) {
            return Err(NOT_CAPABLE);
        }
        let service = self.registry.get(name).ok_or(Errno::ENOENT)?;

        let (ours, theirs) = UnixStream::pair().map_err(io_errno)?;
        Session {
            stream: ours,
            registry: Arc::clone(&self.registry),
            service: Some(service),
            limits: None,
            max_message_size: self.max_message_size,
        }
        .spawn()
        .map_err(io_errno)?;
        tracing::debug!(service = name, "service opened");
        Ok(OwnedFd::from(theirs))
    }
}

fn put(list: &mut ValueList, key: &str, value: impl Into<Value>) -> std::result::Result<(), Errno> {
    list.insert(key, value).map_err(|_| Errno::EINVAL)
}

fn error_response(flags: ListFlags, errno: Errno) -> ValueList {
    ValueList::with_flags(flags).with("error", errno as i32)
}

fn io_errno(err: io::Error) -> Errno {
    err.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}
