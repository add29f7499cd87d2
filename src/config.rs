//! Relay configuration.
//!
//! Layering, lowest first: built-in defaults, the YAML file, environment
//! variables, then command-line flags (applied by the CLI).

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use cdp_adapter::CdpConfig;
use roundcast_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub const TARGET_URL_ENV: &str = "TARGET_URL";
pub const POLL_MS_ENV: &str = "POLL_MS";
pub const PORT_ENV: &str = "PORT";
pub const COALESCE_MS_ENV: &str = "COALESCE_MS";
pub const BIND_ENV: &str = "ROUNDCAST_BIND";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigate_timeout_ms: u64,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1200,
            viewport_height: 800,
            navigate_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Page to monitor.
    pub target_url: Option<String>,
    pub bind: IpAddr,
    pub port: u16,
    /// Outbound queue length per viewer before it counts as too slow.
    pub client_queue: usize,
    pub pipeline: PipelineConfig,
    pub page: PageConfig,
    pub browser: CdpConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            client_queue: 64,
            pipeline: PipelineConfig::default(),
            page: PageConfig::default(),
            browser: CdpConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path` when it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text, path)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_value(TARGET_URL_ENV) {
            self.target_url = Some(value);
        }
        if let Some(value) = env_value(POLL_MS_ENV) {
            self.pipeline.poll_interval_ms = parse_env(POLL_MS_ENV, &value)?;
        }
        if let Some(value) = env_value(PORT_ENV) {
            self.port = parse_env(PORT_ENV, &value)?;
        }
        if let Some(value) = env_value(COALESCE_MS_ENV) {
            self.pipeline.coalesce_window_ms = Some(parse_env(COALESCE_MS_ENV, &value)?);
        }
        if let Some(value) = env_value(BIND_ENV) {
            self.bind = parse_env(BIND_ENV, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(target) = &self.target_url {
            parse_target(target)?;
        }
        if self.client_queue == 0 {
            return Err(ConfigError::Invalid("client_queue must be positive".into()));
        }
        Ok(())
    }

    /// Target URL, required by `serve`.
    pub fn target(&self) -> Result<Url, ConfigError> {
        match &self.target_url {
            Some(target) => parse_target(target),
            None => Err(ConfigError::Invalid(format!(
                "no target page configured (set target_url or {TARGET_URL_ENV})"
            ))),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn parse_target(target: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(target)
        .map_err(|err| ConfigError::Invalid(format!("target_url {target}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "target_url {target}: expected http or https"
        )));
    }
    Ok(url)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in [TARGET_URL_ENV, POLL_MS_ENV, PORT_ENV, COALESCE_MS_ENV, BIND_ENV] {
            env::remove_var(key);
        }
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "target_url: https://game.example/live\nport: 9000\npipeline:\n  poll_interval_ms: 500\n  coalesce_anchor: last_sighting"
        )
        .unwrap();
        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.pipeline.poll_interval_ms, 500);
        assert_eq!(config.pipeline.coalesce_window_ms, None);
        assert_eq!(config.pipeline.coalesce_window().as_millis(), 1_500);
        assert_eq!(config.page.navigate_timeout_ms, 60_000);
        assert_eq!(config.target().unwrap().host_str(), Some("game.example"));
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.target().is_err());
    }

    #[test]
    fn malformed_yaml_is_reported_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: [not a port").unwrap();
        let err = RelayConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    #[serial]
    fn environment_overrides_file_values() {
        clear_env();
        env::set_var(TARGET_URL_ENV, "http://localhost:3000/game");
        env::set_var(POLL_MS_ENV, "750");
        env::set_var(PORT_ENV, "9191");
        env::set_var(COALESCE_MS_ENV, "1500");
        env::set_var(BIND_ENV, "127.0.0.1");
        let mut config = RelayConfig::default();
        config.apply_env().unwrap();
        clear_env();

        assert_eq!(config.pipeline.poll_interval_ms, 750);
        assert_eq!(config.pipeline.coalesce_window_ms, Some(1_500));
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:9191");
        assert_eq!(config.target_url.as_deref(), Some("http://localhost:3000/game"));
    }

    #[test]
    #[serial]
    fn bad_environment_value_is_an_error() {
        clear_env();
        env::set_var(PORT_ENV, "eighty");
        let result = RelayConfig::default().apply_env();
        clear_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { key: PORT_ENV, .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_targets_and_intervals() {
        let mut config = RelayConfig {
            target_url: Some("ftp://files.example".into()),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
        config.target_url = Some("https://ok.example".into());
        config.pipeline.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.pipeline.poll_interval_ms = 1_000;
        config.pipeline.poll_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }
}
