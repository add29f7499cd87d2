use anyhow::Result;
use clap::{Args, Subcommand};

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,

    /// Validate the effective configuration
    Validate,

    /// Print the configuration file path in use
    Path,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            println!("# effective configuration ({})", ctx.config_path().display());
            print!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Validate => {
            ctx.config().validate()?;
            println!("configuration is valid");
        }
        ConfigAction::Path => println!("{}", ctx.config_path().display()),
    }
    Ok(())
}
