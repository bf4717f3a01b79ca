//! Gateway configuration, loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working gateway that uses the built-in development key.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use meshgate_protocol::{SignatureCheck, DEFAULT_JOINER_TIMEOUT_SECS, MAX_LINE_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key compiled into development builds. Deployments must replace it.
pub const DEFAULT_HMAC_KEY: &str = "PROD_SECRET_KEY_CHANGE_ME";

/// Default radio channel for formed networks.
pub const DEFAULT_CHANNEL: u8 = 15;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`GatewayConfig`].
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The pre-shared command signing key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HmacKey(String);

impl HmacKey {
    /// Wrap key text.
    pub fn new(key: impl Into<String>) -> Self {
        HmacKey(key.into())
    }

    /// Key bytes for the authenticator.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether this is the built-in development key.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_HMAC_KEY
    }
}

impl Default for HmacKey {
    fn default() -> Self {
        HmacKey::new(DEFAULT_HMAC_KEY)
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey(<redacted>)")
    }
}

/// Bounds on how long each caller waits for the stack lock, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Network formation.
    pub formation_ms: u64,
    /// Joiner admission.
    pub admission_ms: u64,
    /// Commissioner start and stop.
    pub commissioner_ms: u64,
    /// Event bridge auto-start.
    pub bridge_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            formation_ms: 5000,
            admission_ms: 1000,
            commissioner_ms: 1000,
            bridge_ms: 1000,
        }
    }
}

/// Lock bounds as durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeouts {
    /// Network formation.
    pub formation: Duration,
    /// Joiner admission.
    pub admission: Duration,
    /// Commissioner start and stop.
    pub commissioner: Duration,
    /// Event bridge auto-start.
    pub bridge: Duration,
}

impl From<&LockConfig> for LockTimeouts {
    fn from(config: &LockConfig) -> Self {
        LockTimeouts {
            formation: Duration::from_millis(config.formation_ms),
            admission: Duration::from_millis(config.admission_ms),
            commissioner: Duration::from_millis(config.commissioner_ms),
            bridge: Duration::from_millis(config.bridge_ms),
        }
    }
}

impl Default for LockTimeouts {
    fn default() -> Self {
        LockTimeouts::from(&LockConfig::default())
    }
}

/// Where the gateway's UART is exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Standard input and output.
    #[default]
    Stdio,
    /// A TCP port accepting one client at a time.
    Tcp {
        /// Port to listen on.
        port: u16,
    },
}

impl TransportConfig {
    /// Short name used in metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            TransportConfig::Stdio => "stdio",
            TransportConfig::Tcp { .. } => "tcp",
        }
    }
}

/// Serial read loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Most bytes taken per read.
    pub read_chunk: usize,
    /// How long one read waits for data.
    pub read_timeout_ms: u64,
    /// Pause between reads.
    pub idle_delay_ms: u64,
    /// Transport carrying the serial stream.
    pub transport: TransportConfig,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            read_chunk: 127,
            read_timeout_ms: 50,
            idle_delay_ms: 10,
            transport: TransportConfig::Stdio,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Device name, used in metric labels.
    pub device_name: String,
    /// Pre-shared key for signed commands.
    pub hmac_key: HmacKey,
    /// Compare signatures in constant time.
    pub constant_time_signatures: bool,
    /// Stack lock bounds.
    pub lock: LockConfig,
    /// Joining window for `add` commands, in seconds.
    pub joiner_timeout_secs: u32,
    /// Radio channel for formed networks.
    pub channel: u8,
    /// Longest accepted command line, terminator included.
    pub max_line_len: usize,
    /// Serial read loop.
    pub serial: SerialConfig,
    /// Dispatch watchdog timeout in seconds; 0 disables the watchdog.
    pub watchdog_timeout_secs: u64,
    /// Include joiner credentials in debug logs.
    pub log_credentials: bool,
    /// Directory for persisted network configuration. In memory if unset.
    pub store_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            device_name: "meshgate".to_string(),
            hmac_key: HmacKey::default(),
            constant_time_signatures: false,
            lock: LockConfig::default(),
            joiner_timeout_secs: DEFAULT_JOINER_TIMEOUT_SECS,
            channel: DEFAULT_CHANNEL,
            max_line_len: MAX_LINE_LENGTH,
            serial: SerialConfig::default(),
            watchdog_timeout_secs: 10,
            log_credentials: false,
            store_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hmac_key.as_bytes().is_empty() {
            return Err(ConfigError::Invalid("hmac_key must not be empty".into()));
        }
        let lock = &self.lock;
        if [lock.formation_ms, lock.admission_ms, lock.commissioner_ms, lock.bridge_ms].contains(&0) {
            return Err(ConfigError::Invalid("lock timeouts must be non-zero".into()));
        }
        if self.serial.read_timeout_ms == 0 || self.serial.read_chunk == 0 {
            return Err(ConfigError::Invalid("serial read_chunk and read_timeout_ms must be non-zero".into()));
        }
        if self.joiner_timeout_secs == 0 {
            return Err(ConfigError::Invalid("joiner_timeout_secs must be non-zero".into()));
        }
        if !(11..=26).contains(&self.channel) {
            return Err(ConfigError::Invalid(format!("channel {} outside 11..=26", self.channel)));
        }
        if self.max_line_len < 2 {
            return Err(ConfigError::Invalid("max_line_len must be at least 2".into()));
        }
        Ok(())
    }

    /// Lock bounds as durations.
    pub fn lock_timeouts(&self) -> LockTimeouts {
        LockTimeouts::from(&self.lock)
    }

    /// How signatures are compared.
    pub fn signature_check(&self) -> SignatureCheck {
        if self.constant_time_signatures {
            SignatureCheck::ConstantTime
        } else {
            SignatureCheck::Plain
        }
    }

    /// Watchdog timeout, or `None` when disabled.
    pub fn watchdog_timeout(&self) -> Option<Duration> {
        (self.watchdog_timeout_secs > 0).then(|| Duration::from_secs(self.watchdog_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert!(config.hmac_key.is_default());
        assert_eq!(config.joiner_timeout_secs, 120);
        assert_eq!(config.channel, 15);
        assert_eq!(config.max_line_len, 1024);
        assert_eq!(config.lock_timeouts().formation, Duration::from_secs(5));
        assert_eq!(config.lock_timeouts().admission, Duration::from_secs(1));
        assert_eq!(config.serial.read_chunk, 127);
        assert_eq!(config.watchdog_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.signature_check(), SignatureCheck::Plain);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert_eq!(config.serial.transport, TransportConfig::Stdio);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
hmac_key: "lab-key"
constant_time_signatures: true
channel: 20
lock:
  formation_ms: 8000
serial:
  transport:
    kind: tcp
    port: 9001
watchdog_timeout_secs: 0
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.hmac_key, HmacKey::new("lab-key"));
        assert_eq!(config.signature_check(), SignatureCheck::ConstantTime);
        assert_eq!(config.channel, 20);
        assert_eq!(config.lock.formation_ms, 8000);
        assert_eq!(config.lock.admission_ms, 1000);
        assert_eq!(config.serial.transport, TransportConfig::Tcp { port: 9001 });
        assert_eq!(config.serial.read_timeout_ms, 50);
        assert_eq!(config.watchdog_timeout(), None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(GatewayConfig::from_yaml("hmac_key: \"\"").is_err());
        assert!(GatewayConfig::from_yaml("channel: 27").is_err());
        assert!(GatewayConfig::from_yaml("channel: 10").is_err());
        assert!(GatewayConfig::from_yaml("max_line_len: 1").is_err());
        assert!(GatewayConfig::from_yaml("lock: { admission_ms: 0 }").is_err());
        assert!(GatewayConfig::from_yaml("channel: [1]").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let text = format!("{:?}", GatewayConfig::default());
        assert!(!text.contains(DEFAULT_HMAC_KEY));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn test_from_path_reports_missing_file() {
        let err = GatewayConfig::from_path("/nonexistent/meshgate.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        fs::write(&path, "device_name: gw-07\n").unwrap();
        assert_eq!(GatewayConfig::from_path(&path).unwrap().device_name, "gw-07");
    }
}
