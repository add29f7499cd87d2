use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::env::LogFormat;
use crate::config::RelayConfig;

const LOCAL_ENV_PATH: &str = "config/local.env";
const LOCAL_CONFIG_PATH: &str = "config/roundcast.yaml";

/// Loads `config/local.env` into the process environment without replacing
/// variables that are already set.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV_PATH);
    if !path.exists() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_err() {
                    env::set_var(key, value);
                }
            }
        }
        Err(err) => {
            eprintln!("failed to read {}: {err}", path.display());
        }
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unescape_value(value.trim())))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn unescape_value(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

/// `RUST_LOG` wins over `--log-level`; `--debug` forces debug.
pub fn init_logging(
    level: &str,
    debug: bool,
    format: LogFormat,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter = if debug {
        EnvFilter::new(level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "roundcast.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;
    Ok(guard)
}

pub struct LoadedConfig {
    pub config: RelayConfig,
    pub path: PathBuf,
}

/// Priority: `--config`, then `config/roundcast.yaml`, then the user config
/// directory. Environment overrides are applied on top.
pub fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path(),
    };
    let mut config = RelayConfig::load(&path)?;
    config
        .apply_env()
        .context("invalid environment override")?;
    Ok(LoadedConfig { config, path })
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(LOCAL_CONFIG_PATH);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(mut path) => {
            path.push("roundcast");
            path.push("config.yaml");
            path
        }
        None => {
            warn!("no user config directory; falling back to {LOCAL_CONFIG_PATH}");
            local
        }
    }
}
