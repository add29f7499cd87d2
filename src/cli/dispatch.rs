use anyhow::Result;

use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::info::cmd_info;
use super::serve::cmd_serve;
use super::watch::cmd_watch;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::Watch(args) => cmd_watch(args).await,
        Commands::Config(args) => cmd_config(args, ctx),
        Commands::Info => cmd_info(ctx),
    }
}
