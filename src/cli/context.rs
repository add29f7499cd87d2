use std::path::{Path, PathBuf};

use crate::config::RelayConfig;

pub struct CliContext {
    config: RelayConfig,
    config_path: PathBuf,
    metrics_port: u16,
}

impl CliContext {
    pub fn new(config: RelayConfig, config_path: PathBuf, metrics_port: u16) -> Self {
        Self {
            config,
            config_path,
            metrics_port,
        }
    }

    /// Configuration after file and environment layering.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn metrics_port(&self) -> u16 {
        self.metrics_port
    }
}
