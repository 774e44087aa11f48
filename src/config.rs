//! Runtime options and per-peer host-file persistence.
//!
//! The configuration is loaded once before the event loop starts and is
//! never mutated afterward. Besides the process-wide protocol flags it
//! holds the hosts directory, one file per known peer, where learned
//! `ECDSAPublicKey` lines are appended and read back.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while loading or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write host file {path}: {source}")]
    WriteHostFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_cipher() -> u32 {
    1
}

fn default_digest() -> u32 {
    1
}

fn default_maclength() -> i32 {
    -1
}

fn default_replaywin() -> usize {
    16
}

/// Process-wide runtime options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enable the ECDH/ECDSA exchange for peers advertising protocol
    /// version 2 or later.
    #[serde(default)]
    pub experimental: bool,

    /// Tunnel-server mode: never relay requests on behalf of third
    /// parties and never flood broadcasts onward.
    #[serde(default)]
    pub tunnelserver: bool,

    /// Size in bytes of the late-packet bitmap kept per peer.
    #[serde(default = "default_replaywin")]
    pub replaywin: usize,

    /// Numeric id of the cipher we expect on inbound data packets.
    #[serde(default = "default_cipher")]
    pub cipher: u32,

    /// Numeric id of the digest we expect on inbound data packets.
    #[serde(default = "default_digest")]
    pub digest: u32,

    /// Advertised MAC truncation length; negative selects the digest's
    /// natural length.
    #[serde(default = "default_maclength")]
    pub maclength: i32,

    /// Advertised compression level for inbound data packets.
    #[serde(default)]
    pub compression: i32,

    /// Directory holding one config file per known peer. When unset,
    /// learned public keys are kept in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            experimental: false,
            tunnelserver: false,
            replaywin: default_replaywin(),
            cipher: default_cipher(),
            digest: default_digest(),
            maclength: default_maclength(),
            compression: 0,
            hosts_dir: None,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut contents = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|source| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Append a `<key> <value>` line to the host file for `node`.
    ///
    /// A no-op when no hosts directory is configured.
    pub fn append_host_line(
        &self,
        node: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let Some(dir) = &self.hosts_dir else {
            debug!(node = %node, key = %key, "No hosts directory configured, keeping value in memory only");
            return Ok(());
        };
        let path = dir.join(node);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{} {}", key, value))
            .map_err(|source| ConfigError::WriteHostFile { path, source })
    }

    /// Read the value of the first `<key>` line from the host file for
    /// `node`. Accepts an optional `=` between key and value.
    pub fn read_host_line(&self, node: &str, key: &str) -> Option<String> {
        let dir = self.hosts_dir.as_ref()?;
        let contents = std::fs::read_to_string(dir.join(node)).ok()?;
        for line in contents.lines() {
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some(key) {
                continue;
            }
            match tokens.next() {
                Some("=") => return tokens.next().map(str::to_string),
                Some(value) => return Some(value.to_string()),
                None => continue,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert!(!config.experimental);
        assert!(!config.tunnelserver);
        assert_eq!(config.replaywin, 16);
        assert_eq!(config.cipher, 1);
        assert_eq!(config.digest, 1);
        assert_eq!(config.maclength, -1);
        assert_eq!(config.compression, 0);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "experimental: true\nreplaywin: 32\ncompression: 9\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.experimental);
        assert_eq!(config.replaywin, 32);
        assert_eq!(config.compression, 9);
        // Unspecified fields keep their defaults
        assert_eq!(config.cipher, 1);
    }

    #[test]
    fn test_host_line_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            hosts_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };

        assert_eq!(config.read_host_line("bob", "ECDSAPublicKey"), None);
        config
            .append_host_line("bob", "ECDSAPublicKey", "AmZmZg==")
            .unwrap();
        assert_eq!(
            config.read_host_line("bob", "ECDSAPublicKey").as_deref(),
            Some("AmZmZg==")
        );
    }

    #[test]
    fn test_host_line_accepts_equals_form() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("carol"), "ECDSAPublicKey = abc123\n").unwrap();
        let config = Config {
            hosts_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        assert_eq!(
            config.read_host_line("carol", "ECDSAPublicKey").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_host_line_without_dir_is_noop() {
        let config = Config::new();
        config
            .append_host_line("bob", "ECDSAPublicKey", "value")
            .unwrap();
        assert_eq!(config.read_host_line("bob", "ECDSAPublicKey"), None);
    }
}
