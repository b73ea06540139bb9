use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::vlist::ListFlags;

/// Environment variable naming the broker socket
pub const BROKER_SOCKET_ENV: &str = "TETHER_BROKER_SOCKET";

/// Broker socket used when nothing else is configured
pub const DEFAULT_BROKER_SOCKET: &str = "/var/run/tether.sock";

/// Largest message accepted from a peer (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Smallest sensible message limit: one list header
const MIN_MESSAGE_SIZE: usize = 19;

/// Size of a memory page, falling back to 4096 when the system won't say
pub fn page_size() -> usize {
    nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .and_then(|size| usize::try_from(size).ok())
        .filter(|size| *size > 0)
        .unwrap_or(4096)
}

/// Configuration for channels to the broker
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    broker_socket: PathBuf,
    flags: ListFlags,
    max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            broker_socket: PathBuf::from(DEFAULT_BROKER_SOCKET),
            flags: ListFlags::empty(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Create a new builder for ChannelConfig
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Default configuration with the broker socket taken from
    /// `TETHER_BROKER_SOCKET` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(BROKER_SOCKET_ENV).filter(|p| !p.is_empty()) {
            config.broker_socket = PathBuf::from(path);
        }
        config
    }

    pub fn broker_socket(&self) -> &Path {
        &self.broker_socket
    }

    /// Flags for lists created through channels using this configuration
    pub fn flags(&self) -> ListFlags {
        self.flags
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// Builder for ChannelConfig
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    inner: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn broker_socket(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.broker_socket = path.as_ref().to_path_buf();
        self
    }

    pub fn flags(mut self, flags: ListFlags) -> Self {
        self.inner.flags = flags;
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.inner.max_message_size = bytes;
        self
    }

    pub fn build(self) -> Result<ChannelConfig> {
        if self.inner.broker_socket.as_os_str().is_empty() {
            return Err(Error::Config("broker socket path is empty".to_string()));
        }
        if self.inner.max_message_size < MIN_MESSAGE_SIZE {
            return Err(Error::Config(format!(
                "max message size must be at least {MIN_MESSAGE_SIZE} bytes"
            )));
        }
        Ok(self.inner)
    }
}

/// Configuration for buffer-sized record lookups
#[derive(Debug, Clone)]
pub struct LookupConfig {
    initial_buffer_size: usize,
    max_attempts: Option<usize>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: page_size(),
            max_attempts: None,
        }
    }
}

impl LookupConfig {
    pub fn builder() -> LookupConfigBuilder {
        LookupConfigBuilder::default()
    }

    pub fn initial_buffer_size(&self) -> usize {
        self.initial_buffer_size
    }

    /// Attempt ceiling; `None` means grow until memory runs out
    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }
}

/// Builder for LookupConfig
#[derive(Debug, Default)]
pub struct LookupConfigBuilder {
    inner: LookupConfig,
}

impl LookupConfigBuilder {
    pub fn initial_buffer_size(mut self, bytes: usize) -> Self {
        self.inner.initial_buffer_size = bytes;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.inner.max_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> Result<LookupConfig> {
        if self.inner.initial_buffer_size == 0 {
            return Err(Error::Config("initial buffer size must be non-zero".to_string()));
        }
        if self.inner.max_attempts == Some(0) {
            return Err(Error::Config("max attempts must be non-zero".to_string()));
        }
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::builder()
            .broker_socket("/tmp/broker.sock")
            .flags(ListFlags::NO_UNIQUE)
            .max_message_size(4096)
            .build()
            .unwrap();
        assert_eq!(config.broker_socket(), Path::new("/tmp/broker.sock"));
        assert_eq!(config.flags(), ListFlags::NO_UNIQUE);
        assert_eq!(config.max_message_size(), 4096);
    }

    #[test]
    fn test_channel_config_rejects_tiny_messages() {
        let result = ChannelConfig::builder().max_message_size(4).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_lookup_config_defaults_to_page() {
        let config = LookupConfig::default();
        assert_eq!(config.initial_buffer_size(), page_size());
        assert!(config.max_attempts().is_none());
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn test_lookup_config_validation() {
        assert!(LookupConfig::builder().initial_buffer_size(0).build().is_err());
        assert!(LookupConfig::builder().max_attempts(0).build().is_err());
        let config = LookupConfig::builder()
            .initial_buffer_size(64)
            .max_attempts(8)
            .build()
            .unwrap();
        assert_eq!(config.initial_buffer_size(), 64);
        assert_eq!(config.max_attempts(), Some(8));
    }
}
