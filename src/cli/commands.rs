use clap::Subcommand;

use super::config::ConfigArgs;
use super::serve::ServeArgs;
use super::watch::WatchArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Monitor the target page and relay rounds to WebSocket viewers
    Serve(ServeArgs),

    /// Connect to a relay and display rounds in the terminal
    Watch(WatchArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),

    /// Show version and build information
    Info,
}
