//! roundcast: relays round results observed on a live page to WebSocket
//! viewers.
//!
//! The binary wires the Chromium adapter, the extraction pipeline and the
//! viewer hub together; this library exposes the pieces for tests.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod server;

pub use config::{ConfigError, RelayConfig};
