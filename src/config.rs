//! Runtime configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file
//! (`--config <file>` or `$XDG_CONFIG_HOME/fifoxfer/config.toml`), then
//! command-line flags and their environment variables.
//!
//! ```toml
//! control_path = "/tmp/fifoxfer.control"
//! data_dir = "/tmp"
//! buffer_size = 4096
//! control_timeout_ms = 30000   # omit to wait forever
//! peer_timeout_ms = 5000       # omit to wait forever
//!
//! [open_retry]
//! max_attempts = 50
//! base_delay = 1
//! max_delay = 200
//! ```

use crate::channel::ControlChannel;
use crate::error::{FifoError, Result};
use crate::retry::RetryConfig;
use crate::transfer::{TransferBuffer, DEFAULT_BUFFER_SIZE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Control channel file name under the temp directory
pub const DEFAULT_CONTROL_NAME: &str = "fifoxfer.control";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Well-known path of the shared control channel
    pub control_path: PathBuf,

    /// Directory holding per-session data channels
    pub data_dir: PathBuf,

    /// Transfer buffer capacity in bytes
    pub buffer_size: usize,

    /// How long either side waits on the control channel. `None` waits forever.
    pub control_timeout_ms: Option<u64>,

    /// How long the reader waits for the writer to connect to the data channel
    pub peer_timeout_ms: Option<u64>,

    /// Backoff for non-blocking opens while the peer end is absent
    pub open_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            control_path: tmp.join(DEFAULT_CONTROL_NAME),
            data_dir: tmp,
            buffer_size: DEFAULT_BUFFER_SIZE,
            control_timeout_ms: None,
            peer_timeout_ms: None,
            open_retry: RetryConfig::default(),
        }
    }
}

/// Values supplied on the command line (or via their env vars)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub control_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub control_timeout_ms: Option<u64>,
    pub peer_timeout_ms: Option<u64>,
    pub open_attempts: Option<u32>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/fifoxfer/config.toml` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fifoxfer").join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| FifoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FifoError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_toml(&text).map_err(|e| match e {
            FifoError::Config(msg) => FifoError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Load from `explicit` (which must exist) or from the default location if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => {
                    tracing::debug!("Loading config from {}", path.display());
                    Self::from_file(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(path) = overrides.control_path {
            self.control_path = path;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(size) = overrides.buffer_size {
            self.buffer_size = size;
        }
        if overrides.control_timeout_ms.is_some() {
            self.control_timeout_ms = overrides.control_timeout_ms;
        }
        if overrides.peer_timeout_ms.is_some() {
            self.peer_timeout_ms = overrides.peer_timeout_ms;
        }
        if let Some(attempts) = overrides.open_attempts {
            self.open_retry.max_attempts = attempts;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(FifoError::Config("buffer_size must be positive".to_string()));
        }
        if self.open_retry.max_attempts == 0 {
            return Err(FifoError::Config(
                "open_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.control_path.file_name().is_none() {
            return Err(FifoError::Config(format!(
                "control_path {} has no file name",
                self.control_path.display()
            )));
        }
        Ok(())
    }

    pub fn control_timeout(&self) -> Option<Duration> {
        self.control_timeout_ms.map(Duration::from_millis)
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        self.peer_timeout_ms.map(Duration::from_millis)
    }

    pub fn control_channel(&self) -> ControlChannel {
        ControlChannel::new(&self.control_path)
    }

    pub fn transfer_buffer(&self) -> Result<TransferBuffer> {
        TransferBuffer::new(self.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.control_timeout().is_none());
        assert!(config.control_path.ends_with(DEFAULT_CONTROL_NAME));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            buffer_size = 5
            peer_timeout_ms = 250

            [open_retry]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.peer_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.open_retry.max_attempts, 3);
        assert_eq!(
            config.open_retry.base_delay,
            RetryConfig::default().base_delay
        );
        assert!(config.control_timeout().is_none());
    }

    #[test]
    fn test_retry_delays_are_millis() {
        let config = Config::from_toml(
            r#"
            [open_retry]
            base_delay = 10
            max_delay = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.open_retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.open_retry.max_delay, Duration::from_millis(40));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        assert!(matches!(
            Config::from_toml("buffer_size = 0"),
            Err(FifoError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("bufer_size = 5").is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = Config::default();
        config
            .apply(Overrides {
                control_path: Some(PathBuf::from("/run/x/ctl")),
                buffer_size: Some(5),
                control_timeout_ms: Some(1000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.control_path, PathBuf::from("/run/x/ctl"));
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.control_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = Config::default();
        let err = config
            .apply(Overrides {
                buffer_size: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "data_dir = \"/var/tmp\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/tmp"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("absent.toml"))).is_err());
    }
}
