use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, load_local_env_overrides, LoadedConfig};
use crate::metrics;

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    let _log_guard = init_logging(&cli.log_level, cli.debug, cli.log_format, cli.log_dir.as_deref())?;
    let _metrics_server = metrics::spawn_metrics_server(cli.metrics_port);

    info!("Starting roundcast v{}", env!("CARGO_PKG_VERSION"));

    let LoadedConfig { config, path } = load_config(cli.config.as_ref())?;
    let ctx = CliContext::new(config, path, cli.metrics_port);

    match dispatch(&cli, &ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
