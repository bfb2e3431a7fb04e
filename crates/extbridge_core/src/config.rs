//! Bridge runtime configuration.
//!
//! # Responsibility
//! - Define tunables for timeouts, expiry and queue bounds.
//! - Load them from JSON text, a JSON file, or the `EXTBRIDGE_CONFIG` file.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - `event_queue_capacity` is never zero after validation.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "EXTBRIDGE_CONFIG";

const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_PUSH_TIMEOUT_MS: u64 = 5;

/// Runtime tunables for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Upper bound for sync calls. `None` waits as long as the native call.
    pub sync_timeout_ms: Option<u64>,
    /// Orphans async calls still pending after this long.
    pub pending_expiry_ms: Option<u64>,
    /// Default grace period before a cancelled call is orphaned.
    pub orphan_grace_ms: u64,
    /// Maximum number of undrained events.
    pub event_queue_capacity: usize,
    /// Longest a native thread waits on a full queue before dropping.
    pub push_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: None,
            pending_expiry_ms: None,
            orphan_grace_ms: 0,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            push_timeout_ms: DEFAULT_PUSH_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// Loads the file named by `EXTBRIDGE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_file(raw.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }

    pub fn pending_expiry(&self) -> Option<Duration> {
        self.pending_expiry_ms.map(Duration::from_millis)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_millis(self.orphan_grace_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// Configuration load errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse(message) => write!(f, "invalid config JSON: {message}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{BridgeConfig, ConfigError};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn empty_object_yields_defaults() {
        let config = BridgeConfig::from_json_str("{}").expect("empty config");
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.sync_timeout(), None);
        assert_eq!(config.event_queue_capacity, 1024);
    }

    #[test]
    fn parses_all_fields() {
        let config = BridgeConfig::from_json_str(
            r#"{
                "sync_timeout_ms": 250,
                "pending_expiry_ms": 30000,
                "orphan_grace_ms": 100,
                "event_queue_capacity": 16,
                "push_timeout_ms": 2
            }"#,
        )
        .expect("full config");
        assert_eq!(config.sync_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pending_expiry(), Some(Duration::from_secs(30)));
        assert_eq!(config.orphan_grace(), Duration::from_millis(100));
        assert_eq!(config.event_queue_capacity, 16);
        assert_eq!(config.push_timeout(), Duration::from_millis(2));
    }

    #[test]
    fn rejects_zero_capacity_and_unknown_fields() {
        let err = BridgeConfig::from_json_str(r#"{"event_queue_capacity": 0}"#)
            .expect_err("zero capacity must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = BridgeConfig::from_json_str(r#"{"retries": 3}"#)
            .expect_err("unknown field must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"sync_timeout_ms": 10}}"#).expect("write config");
        let config = BridgeConfig::from_file(file.path()).expect("file config");
        assert_eq!(config.sync_timeout_ms, Some(10));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.json");
        let err = BridgeConfig::from_file(&missing).expect_err("missing file must fail");
        assert!(err.to_string().contains("absent.json"));
    }
}
