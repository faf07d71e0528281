//! Instance configuration.

use std::path::PathBuf;
use std::time::Duration;

use tandem_protocols::WriterKey;

use crate::error::{Error, Result};

/// Default interval between pulses.
pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_millis(5000);
/// Default sleep between writability checks.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(1000);
/// Default bound on the initial announce/dial round.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(8000);
/// Default bound on bootstrap key discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(8000);

/// Configuration for one shared log or key/value instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Topic shared by every peer of this log
    pub topic: String,

    /// Storage directory for this instance
    pub storage: PathBuf,

    /// Bootstrap key of an existing log. `None` reuses the stored key,
    /// discovers one if enabled, or creates a new log.
    pub bootstrap: Option<WriterKey>,

    /// Label used in log output. Defaults to the topic.
    pub log_id: Option<String>,

    pub pulse_interval: Duration,
    pub wait_interval: Duration,
    pub flush_timeout: Duration,

    /// Ask the key channel for the bootstrap key when none is known
    pub discover_bootstrap: bool,
    pub discovery_timeout: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self::new("tandem", "./tandem-data")
    }
}

impl InstanceConfig {
    pub fn new(topic: impl Into<String>, storage: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            storage: storage.into(),
            bootstrap: None,
            log_id: None,
            pulse_interval: DEFAULT_PULSE_INTERVAL,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            discover_bootstrap: false,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_bootstrap(mut self, key: WriterKey) -> Self {
        self.bootstrap = Some(key);
        self
    }

    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = Some(log_id.into());
        self
    }

    pub fn with_pulse_interval(mut self, interval: Duration) -> Self {
        self.pulse_interval = interval;
        self
    }

    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_discovery(mut self, timeout: Duration) -> Self {
        self.discover_bootstrap = true;
        self.discovery_timeout = timeout;
        self
    }

    /// Label for log output.
    pub fn log_id(&self) -> &str {
        self.log_id.as_deref().unwrap_or(&self.topic)
    }

    /// Check values the background tasks cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pulse_interval.is_zero() {
            return Err(Error::Config("pulse interval must be non-zero".into()));
        }
        if self.wait_interval.is_zero() {
            return Err(Error::Config("wait interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Create config from `<PREFIX>_*` environment variables over the defaults.
    ///
    /// `<PREFIX>_TOPIC`, `_DATA_DIR`, `_BOOTSTRAP`, `_LOG_ID`, `_PULSE_MS`,
    /// `_WAIT_MS`, `_FLUSH_TIMEOUT_MS` and `_DISCOVER_BOOTSTRAP`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |suffix: &str, default: Duration| -> Result<Duration> {
            match var(suffix) {
                Some(v) => v
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| Error::Config(format!("Invalid {prefix}_{suffix}: {v}"))),
                None => Ok(default),
            }
        };

        let mut config = Self::default();
        if let Some(topic) = var("TOPIC") {
            config.topic = topic;
        }
        if let Some(dir) = var("DATA_DIR") {
            config.storage = PathBuf::from(dir);
        }
        if let Some(hex) = var("BOOTSTRAP") {
            let key = WriterKey::from_hex(&hex)
                .map_err(|e| Error::Config(format!("Invalid {prefix}_BOOTSTRAP: {e}")))?;
            config.bootstrap = Some(key);
        }
        config.log_id = var("LOG_ID");
        config.pulse_interval = millis("PULSE_MS", config.pulse_interval)?;
        config.wait_interval = millis("WAIT_MS", config.wait_interval)?;
        config.flush_timeout = millis("FLUSH_TIMEOUT_MS", config.flush_timeout)?;
        config.validate()?;
        if let Some(flag) = var("DISCOVER_BOOTSTRAP") {
            config.discover_bootstrap = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(Error::Config(format!(
                        "Invalid {prefix}_DISCOVER_BOOTSTRAP: {flag}"
                    )))
                }
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = InstanceConfig::from_lookup("APP", lookup(&[])).unwrap();
        assert_eq!(config.topic, "tandem");
        assert_eq!(config.pulse_interval, Duration::from_secs(5));
        assert_eq!(config.wait_interval, Duration::from_secs(1));
        assert_eq!(config.flush_timeout, Duration::from_secs(8));
        assert!(!config.discover_bootstrap);
        assert_eq!(config.log_id(), "tandem");
    }

    #[test]
    fn reads_prefixed_variables() {
        let key = WriterKey::from_bytes([4; 32]);
        let hex = key.to_hex();
        let config = InstanceConfig::from_lookup(
            "APP",
            lookup(&[
                ("APP_TOPIC", "room-kv"),
                ("APP_DATA_DIR", "/tmp/room"),
                ("APP_BOOTSTRAP", hex.as_str()),
                ("APP_LOG_ID", "peer-1"),
                ("APP_PULSE_MS", "250"),
                ("APP_DISCOVER_BOOTSTRAP", "true"),
                ("OTHER_TOPIC", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(config.topic, "room-kv");
        assert_eq!(config.storage, PathBuf::from("/tmp/room"));
        assert_eq!(config.bootstrap, Some(key));
        assert_eq!(config.log_id(), "peer-1");
        assert_eq!(config.pulse_interval, Duration::from_millis(250));
        assert!(config.discover_bootstrap);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_ms = InstanceConfig::from_lookup("APP", lookup(&[("APP_WAIT_MS", "soon")]));
        assert!(matches!(bad_ms, Err(Error::Config(_))));

        let bad_key = InstanceConfig::from_lookup("APP", lookup(&[("APP_BOOTSTRAP", "abc")]));
        assert!(matches!(bad_key, Err(Error::Config(_))));

        for name in ["APP_PULSE_MS", "APP_WAIT_MS"] {
            let zero = InstanceConfig::from_lookup("APP", lookup(&[(name, "0")]));
            assert!(matches!(zero, Err(Error::Config(_))), "{name}=0 accepted");
        }
    }

    #[test]
    fn zero_intervals_fail_validation() {
        let base = InstanceConfig::new("t", "/tmp/t");
        assert!(base.validate().is_ok());
        assert!(base
            .clone()
            .with_pulse_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(base.with_wait_interval(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn builders() {
        let config = InstanceConfig::new("t", "/tmp/t")
            .with_log_id("x")
            .with_pulse_interval(Duration::from_millis(100))
            .with_discovery(Duration::from_millis(300));
        assert_eq!(config.log_id(), "x");
        assert!(config.discover_bootstrap);
        assert_eq!(config.discovery_timeout, Duration::from_millis(300));
    }
}
