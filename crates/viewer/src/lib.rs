//! Terminal viewer for a roundcast relay.
//!
//! [`ClientSession`] holds the presentation state; [`Viewer`] connects it to a
//! relay over WebSocket and publishes [`Notice`]s for whatever renders them.

pub mod client;
pub mod command;
pub mod session;
pub mod stats;

pub use client::{Notice, Viewer};
pub use command::{OperatorCommand, UnknownCommand, HELP};
pub use session::{AnalysisState, ClientSession, SessionError, Transition, TransportState};
pub use stats::{history_line, DisplayStats, History, HistoryEntry, HISTORY_CAP};
