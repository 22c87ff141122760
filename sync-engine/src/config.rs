//! Engine configuration.
//!
//! Configuration is loaded from a TOML file; every field has a default, so
//! an empty file (or [`EngineConfig::default`]) is a working setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Pairing configuration.
    #[serde(default)]
    pub pairing: PairingConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Pairing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingConfig {
    /// PIN this device expects (shown to the user). `None` means the PIN
    /// is only checked by the peer.
    #[serde(default)]
    pub pin: Option<String>,
    /// Failed PIN attempts allowed per peer (default: 5).
    #[serde(default = "default_max_pin_attempts")]
    pub max_pin_attempts: u32,
    /// Trust lifetime in milliseconds (default: unbounded).
    #[serde(default)]
    pub trust_ttl_ms: Option<u64>,
    /// Bound on the whole handshake in milliseconds (default: 30000).
    #[serde(default = "default_pairing_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries for transient handshake I/O failures (default: 3).
    #[serde(default = "default_handshake_retries")]
    pub handshake_retries: u32,
    /// Argon2id memory cost for the PIN proof in KiB (default: 19456).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,
    /// Argon2id iterations for the PIN proof (default: 2).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
}

/// Transfer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Items per batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Serialize payloads one batch at a time instead of all up front
    /// (default: true).
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Encrypt item payloads with the pairing secret (default: true).
    #[serde(default = "default_true")]
    pub encryption: bool,
    /// Session time budget in milliseconds (default: 300000).
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Pacing delay before each item in milliseconds (default: 0).
    #[serde(default)]
    pub transfer_delay_ms: u64,
    /// Retries per item before it counts as failed (default: 3).
    #[serde(default = "default_item_failure_budget")]
    pub item_failure_budget: u32,
    /// Fixed delay between item retries in milliseconds (default: 50).
    #[serde(default = "default_item_retry_delay_ms")]
    pub item_retry_delay_ms: u64,
}

/// Discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port announcements are broadcast on (default: 8964).
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// TCP port this device accepts sync connections on (default: 8963).
    #[serde(default = "default_sync_port")]
    pub sync_port: u16,
    /// Time between announcements in milliseconds (default: 2000).
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Consecutive network failures tolerated before giving up (default: 5).
    #[serde(default = "default_discovery_max_retries")]
    pub max_retries: u32,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite trust database. `None` keeps trust in memory.
    #[serde(default)]
    pub trust_database: Option<PathBuf>,
}

// Default value functions
fn default_max_pin_attempts() -> u32 {
    5
}

fn default_pairing_timeout_ms() -> u64 {
    30_000
}

fn default_handshake_retries() -> u32 {
    3
}

fn default_argon2_memory_kib() -> u32 {
    19 * 1024
}

fn default_argon2_iterations() -> u32 {
    2
}

fn default_batch_size() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    300_000
}

fn default_item_failure_budget() -> u32 {
    3
}

fn default_item_retry_delay_ms() -> u64 {
    50
}

fn default_discovery_port() -> u16 {
    8964
}

fn default_sync_port() -> u16 {
    8963
}

fn default_broadcast_interval_ms() -> u64 {
    2000
}

fn default_discovery_max_retries() -> u32 {
    5
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            pin: None,
            max_pin_attempts: default_max_pin_attempts(),
            trust_ttl_ms: None,
            timeout_ms: default_pairing_timeout_ms(),
            handshake_retries: default_handshake_retries(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            streaming: true,
            encryption: true,
            session_timeout_ms: default_session_timeout_ms(),
            transfer_delay_ms: 0,
            item_failure_budget: default_item_failure_budget(),
            item_retry_delay_ms: default_item_retry_delay_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            sync_port: default_sync_port(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            max_retries: default_discovery_max_retries(),
        }
    }
}

impl PairingConfig {
    /// Handshake bound as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TransferConfig {
    /// Session budget as a duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Pacing delay as a duration.
    pub fn transfer_delay(&self) -> Duration {
        Duration::from_millis(self.transfer_delay_ms)
    }

    /// Item retry delay as a duration.
    pub fn item_retry_delay(&self) -> Duration {
        Duration::from_millis(self.item_retry_delay_ms)
    }
}

impl DiscoveryConfig {
    /// Announcement interval as a duration.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.batch_size == 0 {
            return Err(ConfigError::Invalid("transfer.batch_size must be at least 1".into()));
        }
        if self.pairing.max_pin_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pairing.max_pin_attempts must be at least 1".into(),
            ));
        }
        if let Some(pin) = &self.pairing.pin {
            sync_core::Pin::parse(pin)
                .map_err(|e| ConfigError::Invalid(format!("pairing.pin: {}", e)))?;
        }
        Ok(())
    }

    /// Set the expected PIN.
    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pairing.pin = Some(pin.to_string());
        self
    }

    /// Set the PIN attempt limit.
    pub fn with_max_pin_attempts(mut self, attempts: u32) -> Self {
        self.pairing.max_pin_attempts = attempts;
        self
    }

    /// Set the trust lifetime.
    pub fn with_trust_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.pairing.trust_ttl_ms = Some(ttl_ms);
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.transfer.batch_size = batch_size;
        self
    }

    /// Turn streaming on or off.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.transfer.streaming = streaming;
        self
    }

    /// Turn payload encryption on or off.
    pub fn with_encryption(mut self, encryption: bool) -> Self {
        self.transfer.encryption = encryption;
        self
    }

    /// Set the per-item failure budget.
    pub fn with_item_failure_budget(mut self, budget: u32) -> Self {
        self.transfer.item_failure_budget = budget;
        self
    }

    /// Set the session timeout.
    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transfer.session_timeout_ms = timeout_ms;
        self
    }

    /// Set the per-item pacing delay.
    pub fn with_transfer_delay_ms(mut self, delay_ms: u64) -> Self {
        self.transfer.transfer_delay_ms = delay_ms;
        self
    }

    /// Use cheap Argon2id parameters (tests and constrained devices).
    pub fn with_argon2(mut self, memory_kib: u32, iterations: u32) -> Self {
        self.pairing.argon2_memory_kib = memory_kib;
        self.pairing.argon2_iterations = iterations;
        self
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.transfer.batch_size, 100);
        assert_eq!(config.transfer.item_retry_delay_ms, 50);
        assert_eq!(config.pairing.trust_ttl_ms, None);
        assert_eq!(config.discovery.sync_port, 8963);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[pairing]
pin = "1234"
max_pin_attempts = 3
trust_ttl_ms = 1000

[transfer]
batch_size = 10
streaming = false
encryption = false
transfer_delay_ms = 5

[discovery]
port = 9000

[storage]
trust_database = "/data/trust.db"
"#;

        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pairing.pin.as_deref(), Some("1234"));
        assert_eq!(config.pairing.max_pin_attempts, 3);
        assert_eq!(config.pairing.trust_ttl_ms, Some(1000));
        assert_eq!(config.transfer.batch_size, 10);
        assert!(!config.transfer.streaming);
        assert!(!config.transfer.encryption);
        assert_eq!(config.transfer.transfer_delay(), Duration::from_millis(5));
        assert_eq!(config.discovery.port, 9000);
        assert_eq!(
            config.storage.trust_database,
            Some(PathBuf::from("/data/trust.db"))
        );
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let config = EngineConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_pin_is_invalid() {
        let config = EngineConfig::default().with_pin("12ab");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transfer]\nbatch_size = 7").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.transfer.batch_size, 7);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[transfer]\nbatch_size = 0").unwrap();
        assert!(matches!(
            EngineConfig::from_file(bad.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/engine.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
