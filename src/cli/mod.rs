pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod runtime;
pub mod serve;
pub mod watch;

pub use app::run;
pub use serve::{cmd_serve, ServeArgs};
pub use watch::{cmd_watch, WatchArgs};
