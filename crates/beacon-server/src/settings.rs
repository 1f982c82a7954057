//! Process-level settings for the server binary.
//!
//! Engine tuning lives in the layered [`EngineConfig`]; this module only
//! covers what the host itself needs (bind address, log mode, feed size).

use std::net::SocketAddr;
use std::path::PathBuf;

use beacon_core::{ConfigResult, EngineConfig};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default number of events kept for `/api/events`.
pub const DEFAULT_RECENT_EVENTS: usize = 256;

/// Host settings read from `BEACON_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address the HTTP listener binds to (`BEACON_BIND_ADDR`).
    pub bind_addr: SocketAddr,
    /// Explicit engine config file (`BEACON_CONFIG`).
    pub config_path: Option<PathBuf>,
    /// Production logging when `BEACON_ENV=production`.
    pub production: bool,
    /// Capacity of the recent-events feed (`BEACON_RECENT_EVENTS`).
    pub recent_events: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            config_path: None,
            production: false,
            recent_events: DEFAULT_RECENT_EVENTS,
        }
    }
}

impl ServerSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("BEACON_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid BEACON_BIND_ADDR: {e}"))?;

        let recent_events = match lookup("BEACON_RECENT_EVENTS") {
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("BEACON_RECENT_EVENTS must be a positive integer"))?,
            None => DEFAULT_RECENT_EVENTS,
        };

        Ok(Self {
            bind_addr,
            config_path: lookup("BEACON_CONFIG").map(PathBuf::from),
            production: lookup("BEACON_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production")),
            recent_events,
        })
    }

    /// Load the engine configuration from the explicit path, or from the
    /// platform default location when none was given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable or invalid.
    pub fn load_engine_config(&self) -> ConfigResult<EngineConfig> {
        match &self.config_path {
            Some(path) => EngineConfig::load(Some(path)),
            None => EngineConfig::load_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = ServerSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, ServerSettings::default());
    }

    #[test]
    fn test_reads_overrides() {
        let settings = ServerSettings::from_lookup(lookup(&[
            ("BEACON_BIND_ADDR", "127.0.0.1:8080"),
            ("BEACON_ENV", "Production"),
            ("BEACON_RECENT_EVENTS", "32"),
            ("BEACON_CONFIG", "/tmp/beacon.toml"),
        ]))
        .unwrap();
        assert_eq!(settings.bind_addr.port(), 8080);
        assert!(settings.production);
        assert_eq!(settings.recent_events, 32);
        assert_eq!(settings.config_path, Some(PathBuf::from("/tmp/beacon.toml")));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ServerSettings::from_lookup(lookup(&[("BEACON_BIND_ADDR", "nowhere")])).is_err());
        assert!(ServerSettings::from_lookup(lookup(&[("BEACON_RECENT_EVENTS", "0")])).is_err());
    }

    #[test]
    fn test_loads_engine_config_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmin_enter_samples = 5").unwrap();
        let settings = ServerSettings {
            config_path: Some(file.path().to_path_buf()),
            ..ServerSettings::default()
        };
        let config = settings.load_engine_config().unwrap();
        assert_eq!(config.min_enter_samples, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let settings = ServerSettings {
            config_path: Some(PathBuf::from("/nonexistent/beacon.toml")),
            ..ServerSettings::default()
        };
        assert!(settings.load_engine_config().is_err());
    }
}
