//! # Configuration
//!
//! Typed configuration for the storage engine, loaded from a TOML file.
//!
//! Files are searched in order: `./netchunk.toml`,
//! `~/.netchunk/netchunk.toml`, `/etc/netchunk/netchunk.toml`. Every key
//! has a default, so a minimal config only needs its `[[servers]]` entries.
//!
//! ```toml
//! chunk_size = 4194304
//! replication_factor = 2
//!
//! [[servers]]
//! id = "alpha"
//! host = "ftp.example.com"
//! port = 21
//! username = "chunks"
//! password = "secret"
//! base_path = "/netchunk"
//! priority = 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunker::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::manifest::MAX_REPLICAS;

/// Default target replicas per chunk.
pub const DEFAULT_REPLICATION_FACTOR: u32 = 3;

// ============================================================================
// SERVER DESCRIPTOR
// ============================================================================

/// One configured storage server.
///
/// The engine stores only `id` in placements; everything else is consumed
/// by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identifier recorded in manifests. Never renumber.
    pub id: String,
    /// Hostname or address for the transport.
    pub host: String,
    /// Port for the transport.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport username.
    #[serde(default)]
    pub username: String,
    /// Transport password.
    #[serde(default)]
    pub password: String,
    /// Base directory on the server; all objects live beneath it.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Whether the transport should use TLS.
    #[serde(default)]
    pub use_ssl: bool,
    /// Placement preference; higher wins ties. Defaults to 0.
    #[serde(default)]
    pub priority: i32,
    /// Disabled servers are skipped entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_port() -> u16 {
    21
}

fn default_base_path() -> String {
    "/netchunk".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// CONFIG
// ============================================================================

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chunker block size in bytes, within `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
    pub chunk_size: u64,
    /// Target replicas per chunk; must not exceed the enabled server count.
    pub replication_factor: u32,
    /// Minimum replicas a read should find before the file counts as at risk.
    pub min_replicas_required: u32,
    /// Cap on concurrent BlobStore operations within one file operation.
    pub max_concurrent_operations: usize,
    /// Attempts per BlobStore call, including the first.
    pub max_retry_attempts: u32,
    /// Run an automatic repair pass after verify finds problems.
    pub auto_repair_enabled: bool,
    /// Seconds to wait before an automatic repair pass.
    pub repair_delay: u64,
    /// Allow the rebalancing pass to move replicas between servers.
    pub rebalancing_enabled: bool,
    /// Cap on replica moves per rebalancing pass.
    pub max_rebalance_moves: u32,
    /// Re-hash the whole output file after every download.
    pub always_verify_integrity: bool,
    /// Local manifest cache directory. `~` is expanded.
    pub manifest_dir: String,
    /// Snapshot manifests before overwriting them.
    pub auto_backup: bool,
    /// Backups retained per manifest.
    pub max_backups: usize,
    /// Configured storage servers.
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            min_replicas_required: 1,
            max_concurrent_operations: 4,
            max_retry_attempts: 3,
            auto_repair_enabled: false,
            repair_delay: 0,
            rebalancing_enabled: false,
            max_rebalance_moves: 16,
            always_verify_integrity: true,
            manifest_dir: "~/.netchunk/manifests".to_string(),
            auto_backup: true,
            max_backups: 3,
            servers: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("config parse error: {}", e)))?;
        config.validate()?;
        debug!(path = %path.display(), servers = config.servers.len(), "config loaded");
        Ok(config)
    }

    /// Load from the first config file found in the search path, or fall
    /// back to defaults (which won't validate until servers are added).
    pub fn load_default_locations() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Validate every recognized key.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidInput(format!(
                "chunk_size {} outside [{}, {}]",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if self.replication_factor < 1 || self.replication_factor > MAX_REPLICAS {
            return Err(Error::InvalidInput(format!(
                "replication_factor {} outside [1, {}]",
                self.replication_factor, MAX_REPLICAS
            )));
        }
        if self.min_replicas_required < 1
            || self.min_replicas_required > self.replication_factor
        {
            return Err(Error::InvalidInput(format!(
                "min_replicas_required {} outside [1, {}]",
                self.min_replicas_required, self.replication_factor
            )));
        }
        if self.max_retry_attempts < 1 {
            return Err(Error::InvalidInput("max_retry_attempts must be at least 1".into()));
        }
        if self.max_concurrent_operations < 1 {
            return Err(Error::InvalidInput(
                "max_concurrent_operations must be at least 1".into(),
            ));
        }

        let enabled = self.enabled_servers();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(Error::InvalidInput("server id must not be empty".into()));
            }
            if server.base_path.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "server '{}' has an empty base_path",
                    server.id
                )));
            }
        }
        for (i, server) in self.servers.iter().enumerate() {
            if self.servers[..i].iter().any(|other| other.id == server.id) {
                return Err(Error::InvalidInput(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
        }

        if (enabled.len() as u32) < self.replication_factor {
            return Err(Error::InsufficientServers(format!(
                "replication_factor {} exceeds the {} enabled servers",
                self.replication_factor,
                enabled.len()
            )));
        }

        Ok(())
    }

    /// Enabled servers, priority descending then id ascending.
    pub fn enabled_servers(&self) -> Vec<&ServerConfig> {
        let mut servers: Vec<&ServerConfig> =
            self.servers.iter().filter(|s| s.enabled).collect();
        servers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        servers
    }

    /// Find an enabled server by id.
    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.enabled && s.id == id)
    }

    /// The manifest cache directory with `~` expanded.
    pub fn manifest_dir_expanded(&self) -> PathBuf {
        expand_path(&self.manifest_dir)
    }
}

// ============================================================================
// FILE DISCOVERY & PATH EXPANSION
// ============================================================================

/// First existing config file in the standard search order.
pub fn find_config_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("netchunk.toml")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".netchunk").join("netchunk.toml"));
    }
    candidates.push(PathBuf::from("/etc/netchunk/netchunk.toml"));

    candidates.into_iter().find(|p| p.is_file())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, priority: i32) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            host: format!("{}.example.com", id),
            port: 21,
            username: "user".into(),
            password: "pass".into(),
            base_path: "/netchunk".into(),
            use_ssl: false,
            priority,
            enabled: true,
        }
    }

    fn valid_config() -> Config {
        Config {
            replication_factor: 2,
            servers: vec![server("alpha", 0), server("beta", 5), server("gamma", 0)],
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.replication_factor, DEFAULT_REPLICATION_FACTOR);
        assert!(config.always_verify_integrity);
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut config = valid_config();
        config.chunk_size = MIN_CHUNK_SIZE - 1;
        assert!(config.validate().is_err());
        config.chunk_size = MAX_CHUNK_SIZE;
        config.validate().unwrap();
    }

    #[test]
    fn test_replication_needs_enough_servers() {
        let mut config = valid_config();
        config.replication_factor = 4;
        let err = config.validate().unwrap_err();
        assert_eq!(err.short_str(), "insufficient servers");

        // Disabled servers don't count.
        config.replication_factor = 3;
        config.servers[0].enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_server_ids_rejected() {
        let mut config = valid_config();
        config.servers.push(server("alpha", 9));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_servers_ordering() {
        let config = valid_config();
        let ordered: Vec<&str> = config.enabled_servers().iter().map(|s| s.id.as_str()).collect();
        // Priority desc, then id asc.
        assert_eq!(ordered, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let text = r#"
            replication_factor = 2

            [[servers]]
            id = "alpha"
            host = "a.example.com"

            [[servers]]
            id = "beta"
            host = "b.example.com"
            priority = 3
        "#;
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.servers[0].port, 21);
        assert_eq!(config.servers[0].base_path, "/netchunk");
        assert!(config.servers[1].enabled);
        assert_eq!(config.servers[1].priority, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netchunk.toml");
        std::fs::write(
            &path,
            "replication_factor = 1\n[[servers]]\nid = \"only\"\nhost = \"h\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.servers.len(), 1);

        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(err.short_str(), "not found");
    }

    #[test]
    fn test_malformed_toml_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netchunk.toml");
        std::fs::write(&path, "chunk_size = \"lots\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.short_str(), "invalid input");
    }

    #[test]
    fn test_expand_path() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
            assert_eq!(expand_path("~/x/y"), home.join("x/y"));
        }
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
