//! Configuration for the Chiral core: network, storage, security and
//! logging knobs, loaded from TOML with environment overrides for headless
//! operation (`CHIRAL_STORE_DIR`, `CHIRAL_LISTEN_ADDR`,
//! `CHIRAL_BOOTSTRAP_DOMAINS`, `CHIRAL_SOCKS5`, see §6).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ChiralResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Default listen port (0 for an ephemeral port).
    pub default_port: u16,
    /// Per-operation timeouts, matching §5 defaults.
    pub chunk_request_timeout_secs: u64,
    pub dht_lookup_timeout_secs: u64,
    pub control_message_timeout_secs: u64,
    /// DNS names resolved to bootstrap multiaddresses on startup (§4.2).
    pub bootstrap_domains: Vec<String>,
    /// Kademlia k-bucket size.
    pub replication_factor: usize,
    /// Provider record republish/expire intervals (§4.2).
    pub provider_republish_secs: u64,
    pub provider_expire_secs: u64,
    /// Bounded relay reservation cache size (§4.3).
    pub max_relay_reservations: usize,
    /// Optional SOCKS5 proxy address; see DESIGN.md for the Open Question
    /// decision on how far this is implemented.
    pub socks5_proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the content-addressed store (`<store>/...` in §6).
    pub store_dir: PathBuf,
    /// Default chunk size, 256 KiB per §4.1.
    pub chunk_size: usize,
    /// Checkpoint interval, 2s of activity per §4.6.
    pub checkpoint_interval_secs: u64,
    /// Checkpoint chunk-count trigger, alternative to the interval.
    pub checkpoint_chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Encryption algorithm identifier, recorded for forward compatibility.
    pub encryption_algorithm: String,
    pub verify_integrity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                default_port: 0,
                chunk_request_timeout_secs: 20,
                dht_lookup_timeout_secs: 10,
                control_message_timeout_secs: 5,
                bootstrap_domains: vec!["bootstrap.chiral.network".to_string()],
                replication_factor: 20,
                provider_republish_secs: 10 * 60,
                provider_expire_secs: 60 * 60,
                max_relay_reservations: 16,
                socks5_proxy: None,
            },
            storage: StorageConfig {
                store_dir: default_store_dir(),
                chunk_size: 256 * 1024,
                checkpoint_interval_secs: 2,
                checkpoint_chunk_count: 16,
            },
            security: SecurityConfig {
                encryption_algorithm: "x25519-xchacha20poly1305".to_string(),
                verify_integrity: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                structured: true,
                log_file: None,
            },
        }
    }
}

fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".chiral").join("store"))
        .unwrap_or_else(|| PathBuf::from("./chiral-store"))
}

impl Config {
    /// Load from a TOML file, falling back to defaults; then apply
    /// `CHIRAL_*` environment overrides on top (env wins, matching the CLI's
    /// "user-specified arguments take precedence" convention).
    pub fn load_or_default(config_path: Option<PathBuf>) -> ChiralResult<Self> {
        let mut config = if let Some(path) = &config_path {
            if path.exists() {
                let config_str = std::fs::read_to_string(path)?;
                let config: Config = toml::from_str(&config_str)?;
                tracing::info!("loaded configuration from {:?}", path);
                config
            } else {
                Config::default()
            }
        } else {
            tracing::info!("using default configuration");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CHIRAL_STORE_DIR") {
            self.storage.store_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("CHIRAL_LISTEN_ADDR") {
            if let Some(port) = addr.rsplit('/').next().and_then(|p| p.parse().ok()) {
                self.network.default_port = port;
            }
        }
        if let Ok(domains) = std::env::var("CHIRAL_BOOTSTRAP_DOMAINS") {
            self.network.bootstrap_domains =
                domains.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(proxy) = std::env::var("CHIRAL_SOCKS5") {
            self.network.socks5_proxy = Some(proxy);
        }
    }

    pub fn save(&self, config_path: &PathBuf) -> ChiralResult<()> {
        let config_str = toml::to_string_pretty(self)?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, config_str)?;
        tracing::info!("configuration saved to {:?}", config_path);
        Ok(())
    }

    pub fn chunk_request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.chunk_request_timeout_secs)
    }

    pub fn dht_lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.network.dht_lookup_timeout_secs)
    }

    pub fn control_message_timeout(&self) -> Duration {
        Duration::from_secs(self.network.control_message_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = Config::default();
        assert_eq!(config.storage.chunk_size, 256 * 1024);
        assert_eq!(config.network.replication_factor, 20);
        assert_eq!(config.network.provider_republish_secs, 600);
        assert_eq!(config.network.provider_expire_secs, 3600);
        assert_eq!(config.network.max_relay_reservations, 16);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        config.save(&path).unwrap();
        let loaded = Config::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.storage.chunk_size, config.storage.chunk_size);
    }
}
