//! Per-connection presentation state.
//!
//! The session never performs I/O. The client loop drives it with transport
//! transitions, server messages and operator actions, and renders whatever
//! it returns.

use chrono::{DateTime, Utc};
use roundcast_core_types::ServerMessage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::stats::{DisplayStats, History, HistoryEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Idle,
    Analyzing,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("invalid endpoint {0}: expected a ws:// or wss:// URL")]
    InvalidEndpoint(String),
    #[error("connect to the server first")]
    NotConnected,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
}

/// Result of an operator action that can be a harmless no-op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged(&'static str),
}

#[derive(Debug)]
pub struct ClientSession {
    endpoint: Option<Url>,
    joined_at: Option<DateTime<Utc>>,
    transport: TransportState,
    analysis: AnalysisState,
    history: History,
    total: u64,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            joined_at: None,
            transport: TransportState::Disconnected,
            analysis: AnalysisState::Idle,
            history: History::default(),
            total: 0,
        }
    }

    /// Validates the endpoint and moves to `Connecting`.
    pub fn connect(&mut self, endpoint: &str) -> Result<Url, SessionError> {
        if self.transport != TransportState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }
        let url = Url::parse(endpoint.trim())
            .map_err(|_| SessionError::InvalidEndpoint(endpoint.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
            return Err(SessionError::InvalidEndpoint(endpoint.to_string()));
        }
        self.transport = TransportState::Connecting;
        self.endpoint = Some(url.clone());
        debug!(target: "viewer", %url, "connecting");
        Ok(url)
    }

    pub fn on_connected(&mut self) {
        self.transport = TransportState::Connected;
        self.joined_at = Some(Utc::now());
    }

    /// Connection ended without the operator asking. Analysis stops with it.
    pub fn on_transport_lost(&mut self) {
        self.transport = TransportState::Disconnected;
        self.analysis = AnalysisState::Idle;
        self.joined_at = None;
    }

    pub fn disconnect(&mut self) {
        self.on_transport_lost();
    }

    pub fn start(&mut self) -> Result<Transition, SessionError> {
        if self.transport != TransportState::Connected {
            return Err(SessionError::NotConnected);
        }
        if self.analysis == AnalysisState::Analyzing {
            return Ok(Transition::Unchanged("analysis already running"));
        }
        self.analysis = AnalysisState::Analyzing;
        Ok(Transition::Changed)
    }

    pub fn stop(&mut self) -> Transition {
        if self.analysis == AnalysisState::Idle {
            return Transition::Unchanged("analysis already stopped");
        }
        self.analysis = AnalysisState::Idle;
        Transition::Changed
    }

    /// Applies one server text message; returns the new history entry for a
    /// round accepted while analyzing.
    pub fn on_message(&mut self, text: &str) -> Option<HistoryEntry> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                trace!(target: "viewer", %err, "ignoring message");
                return None;
            }
        };
        let ServerMessage::Round(payload) = message else {
            return None;
        };
        if self.analysis != AnalysisState::Analyzing {
            trace!(target: "viewer", multiplier = %payload.multiplier, "idle; round not recorded");
            return None;
        }
        let entry = HistoryEntry::from_payload(&payload);
        self.history.push(entry.clone());
        self.total += 1;
        Some(entry)
    }

    pub fn stats(&self) -> DisplayStats {
        DisplayStats::compute(&self.history, self.total)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn analysis(&self) -> AnalysisState {
        self.analysis
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        self.joined_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ClientSession {
        let mut session = ClientSession::new();
        session.connect("ws://127.0.0.1:8080").unwrap();
        session.on_connected();
        session
    }

    #[test]
    fn connect_accepts_only_websocket_urls() {
        let mut session = ClientSession::new();
        for bad in ["http://host:8080", "not a url", "ws://", ""] {
            assert!(matches!(
                session.connect(bad),
                Err(SessionError::InvalidEndpoint(_))
            ));
            assert_eq!(session.transport(), TransportState::Disconnected);
        }
        assert!(session.connect("wss://relay.example/ws").is_ok());
        assert_eq!(session.transport(), TransportState::Connecting);
    }

    #[test]
    fn connect_refused_while_connecting_or_connected() {
        let mut session = ClientSession::new();
        session.connect("ws://a:1").unwrap();
        assert_eq!(session.connect("ws://b:2"), Err(SessionError::AlreadyConnected));
        session.on_connected();
        assert_eq!(session.connect("ws://b:2"), Err(SessionError::AlreadyConnected));
        assert_eq!(session.endpoint().map(|u| u.as_str()), Some("ws://a:1/"));
    }

    #[test]
    fn start_requires_connection_and_warns_when_repeated() {
        let mut session = ClientSession::new();
        assert_eq!(session.start(), Err(SessionError::NotConnected));
        assert_eq!(session.analysis(), AnalysisState::Idle);

        let mut session = connected();
        assert_eq!(session.start(), Ok(Transition::Changed));
        assert!(matches!(session.start(), Ok(Transition::Unchanged(_))));
        assert_eq!(session.stop(), Transition::Changed);
        assert!(matches!(session.stop(), Transition::Unchanged(_)));
    }

    #[test]
    fn rounds_are_recorded_only_while_analyzing() {
        let mut session = connected();
        let round = r#"{"multiplier":2.5,"ts":1,"source":"frame"}"#;
        assert!(session.on_message(round).is_none());
        session.start().unwrap();
        let entry = session.on_message(round).unwrap();
        assert_eq!(entry.confidence, 0.85);
        assert!(session
            .on_message(r#"{"status":"connected","ts":1}"#)
            .is_none());
        assert!(session.on_message("pong").is_none());
        assert_eq!(session.total(), 1);
        assert_eq!(session.stats().count, 1);
    }

    #[test]
    fn transport_loss_resets_to_disconnected_idle() {
        let mut session = connected();
        session.start().unwrap();
        session.on_transport_lost();
        assert_eq!(session.transport(), TransportState::Disconnected);
        assert_eq!(session.analysis(), AnalysisState::Idle);
        assert!(session.joined_at().is_none());
        assert!(session.connect("ws://127.0.0.1:8080").is_ok());
    }
}
