//! Engine configuration.
//!
//! Configuration is built once, validated, and never changes while the engine
//! runs. Values are layered with the `config` crate:
//! - built-in defaults
//! - an optional TOML file (`[engine]` table)
//! - `BEACON_ENGINE__*` environment variables
//!
//! Durations are written as milliseconds (`*_ms` keys).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Tuning knobs for the whole detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples older than this are purged from a ranging window.
    #[serde(rename = "ranging_window_horizon_ms", with = "duration_ms")]
    pub ranging_window_horizon: Duration,

    /// Maximum samples kept per ranging window.
    pub ranging_window_capacity: usize,

    /// Age at which a sample's smoothing weight halves.
    #[serde(rename = "ranging_half_life_ms", with = "duration_ms")]
    pub ranging_half_life: Duration,

    /// Corroborating sightings needed before a beacon counts as present.
    pub min_enter_samples: usize,

    /// Window in which corroborating sightings are counted.
    #[serde(rename = "debounce_window_ms", with = "duration_ms")]
    pub debounce_window: Duration,

    /// Smoothed strength a sighting needs to corroborate presence.
    pub enter_threshold_dbm: i16,

    /// Minimum spacing between `Update` events for one beacon.
    #[serde(rename = "update_interval_ms", with = "duration_ms")]
    pub update_interval: Duration,

    /// Silence after which a present beacon starts exiting.
    #[serde(rename = "soft_exit_timeout_ms", with = "duration_ms")]
    pub soft_exit_timeout: Duration,

    /// Silence after which `Exit` is emitted.
    #[serde(rename = "hard_exit_timeout_ms", with = "duration_ms")]
    pub hard_exit_timeout: Duration,

    /// Period of the eviction sweep.
    #[serde(rename = "eviction_sweep_interval_ms", with = "duration_ms")]
    pub eviction_sweep_interval: Duration,

    /// Silence after which an absent beacon's record is dropped.
    #[serde(rename = "removal_grace_period_ms", with = "duration_ms")]
    pub removal_grace_period: Duration,

    /// Weakest accepted signal.
    pub min_signal_dbm: i16,

    /// Strongest accepted signal.
    pub max_signal_dbm: i16,

    /// Transmit power at 1m assumed when a record carries none.
    pub default_tx_power: i16,

    /// Path-loss exponent for distance estimation (2.0 is free space).
    pub path_loss_exponent: f64,

    /// How far ahead of the engine clock a timestamp may be.
    #[serde(rename = "max_clock_skew_ms", with = "duration_ms")]
    pub max_clock_skew: Duration,

    /// Capacity of the ingestion queue feeding the engine.
    pub ingest_queue_capacity: usize,

    /// Capacity of each observer's delivery queue.
    pub observer_queue_capacity: usize,

    /// Upper bound on every wait during queries and shutdown.
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ranging_window_horizon: Duration::from_secs(10),
            ranging_window_capacity: 64,
            ranging_half_life: Duration::from_secs(2),
            min_enter_samples: 3,
            debounce_window: Duration::from_secs(5),
            enter_threshold_dbm: -100,
            update_interval: Duration::from_secs(1),
            soft_exit_timeout: Duration::from_secs(5),
            hard_exit_timeout: Duration::from_secs(10),
            eviction_sweep_interval: Duration::from_millis(500),
            removal_grace_period: Duration::from_secs(60),
            min_signal_dbm: -100,
            max_signal_dbm: 0,
            default_tx_power: -59,
            path_loss_exponent: 2.0,
            max_clock_skew: Duration::from_secs(2),
            ingest_queue_capacity: 1024,
            observer_queue_capacity: 256,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Layered sources could not be merged or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be written as TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// One field failed validation.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Serialize, Deserialize)]
struct Layered {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// A missing file at `path` is an error; pass `None` to skip the file
    /// layer, or use [`EngineConfig::load_or_default`] for the standard path.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
        }
        Self::build(path)
    }

    /// Like [`EngineConfig::load`] with the platform default path, which may
    /// be absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_or_default() -> ConfigResult<Self> {
        let path = default_config_path();
        Self::build(path.as_deref().filter(|p| p.exists()))
    }

    fn build(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(
            &Layered {
                engine: Self::default(),
            },
        )?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let layered: Layered = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        layered.engine.validate()?;
        tracing::debug!(?path, "Loaded engine configuration");
        Ok(layered.engine)
    }

    /// Write this configuration as TOML under an `[engine]` table.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Render as TOML under an `[engine]` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be represented in TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&Layered {
            engine: self.clone(),
        })?)
    }

    /// Check every constraint, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single failure and
    /// [`ConfigError::MultipleValidationErrors`] otherwise.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &'static str, message: String| {
            errors.push(ConfigError::ValidationError { field, message });
        };

        if self.min_enter_samples < 1 {
            fail("min_enter_samples", "must be at least 1".into());
        }
        if self.ranging_window_capacity < 1 {
            fail("ranging_window_capacity", "must be at least 1".into());
        }
        if self.ranging_window_horizon.is_zero() {
            fail("ranging_window_horizon", "must be greater than zero".into());
        }
        if self.ranging_half_life.is_zero() {
            fail("ranging_half_life", "must be greater than zero".into());
        }
        if self.debounce_window.is_zero() {
            fail("debounce_window", "must be greater than zero".into());
        }
        if self.hard_exit_timeout <= self.soft_exit_timeout {
            fail(
                "hard_exit_timeout",
                format!(
                    "must be greater than soft_exit_timeout ({:?} <= {:?})",
                    self.hard_exit_timeout, self.soft_exit_timeout
                ),
            );
        }
        if self.removal_grace_period < self.hard_exit_timeout {
            fail(
                "removal_grace_period",
                "must be at least hard_exit_timeout".into(),
            );
        }
        if self.eviction_sweep_interval.is_zero() {
            fail("eviction_sweep_interval", "must be greater than zero".into());
        }
        if self.min_signal_dbm > self.max_signal_dbm {
            fail(
                "min_signal_dbm",
                format!(
                    "must not exceed max_signal_dbm ({} > {})",
                    self.min_signal_dbm, self.max_signal_dbm
                ),
            );
        }
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            fail("path_loss_exponent", "must be a positive number".into());
        }
        if self.ingest_queue_capacity < 1 {
            fail("ingest_queue_capacity", "must be at least 1".into());
        }
        if self.observer_queue_capacity < 1 {
            fail("observer_queue_capacity", "must be at least 1".into());
        }
        if self.shutdown_timeout.is_zero() {
            fail("shutdown_timeout", "must be greater than zero".into());
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/beacon/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/beacon/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_hard_timeout_must_exceed_soft() {
        let config = EngineConfig {
            soft_exit_timeout: Duration::from_secs(10),
            hard_exit_timeout: Duration::from_secs(10),
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "hard_exit_timeout",
                ..
            }
        ));
    }

    #[test]
    fn test_validation_collects_every_failure() {
        let config = EngineConfig {
            min_enter_samples: 0,
            observer_queue_capacity: 0,
            path_loss_exponent: f64::NAN,
            ..EngineConfig::default()
        };
        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other}"),
        }
    }

    #[test]
    fn test_removal_grace_must_cover_hard_timeout() {
        let config = EngineConfig {
            removal_grace_period: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_uses_millisecond_keys() {
        let toml = EngineConfig::default().to_toml_string().unwrap();
        assert!(toml.contains("[engine]"));
        assert!(toml.contains("hard_exit_timeout_ms = 10000"));
        assert!(toml.contains("min_enter_samples = 3"));
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nmin_enter_samples = 2\nsoft_exit_timeout_ms = 3000\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.min_enter_samples, 2);
        assert_eq!(config.soft_exit_timeout, Duration::from_secs(3));
        assert_eq!(config.hard_exit_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = EngineConfig {
            update_interval: Duration::from_millis(250),
            enter_threshold_dbm: -80,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\nsoft_exit_timeout_ms = 9000\nhard_exit_timeout_ms = 4000\n",
        )
        .unwrap();

        assert!(matches!(
            EngineConfig::load(Some(&path)),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let result = EngineConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
