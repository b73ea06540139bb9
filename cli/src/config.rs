use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use tether::{ChannelConfig, User};

use crate::cli::CommonArgs;

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Broker socket path
    pub socket: Option<PathBuf>,

    /// Largest message accepted, in bytes
    pub max_message_size: Option<usize>,

    /// Users served by the `system.pwd` service
    pub users: Vec<User>,
}

/// Load config from file, or return defaults
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Merge file config with CLI args (CLI takes precedence)
pub fn merge_config(file: &FileConfig, cli: &CommonArgs) -> Result<ChannelConfig> {
    let defaults = ChannelConfig::from_env();
    let socket = cli
        .socket
        .as_deref()
        .or(file.socket.as_deref())
        .unwrap_or(defaults.broker_socket());
    let max_message_size = cli
        .max_message_size
        .or(file.max_message_size)
        .unwrap_or(defaults.max_message_size());

    ChannelConfig::builder()
        .broker_socket(socket)
        .max_message_size(max_message_size)
        .build()
        .context("invalid channel configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(
            &path,
            r#"
socket = "/tmp/tether-test.sock"

[[users]]
name = "alice"
uid = 1000
gid = 1000
dir = "/home/alice"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.socket.as_deref(), Some(Path::new("/tmp/tether-test.sock")));
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].dir, "/home/alice");
        assert!(config.users[0].shell.is_empty());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            socket: Some(PathBuf::from("/from/file.sock")),
            max_message_size: Some(4096),
            users: Vec::new(),
        };
        let cli = CommonArgs {
            socket: Some(PathBuf::from("/from/cli.sock")),
            max_message_size: None,
        };
        let config = merge_config(&file, &cli).unwrap();
        assert_eq!(config.broker_socket(), Path::new("/from/cli.sock"));
        assert_eq!(config.max_message_size(), 4096);
    }

    #[test]
    fn test_invalid_size_rejected() {
        let cli = CommonArgs {
            socket: None,
            max_message_size: Some(1),
        };
        assert!(merge_config(&FileConfig::default(), &cli).is_err());
    }
}
