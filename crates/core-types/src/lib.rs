//! Shared primitives for the roundcast workspace.
//!
//! Everything that crosses a crate boundary lives here: the candidate and
//! extracted-value records flowing through the pipeline, the canonical
//! [`RoundEvent`], and the [`ServerMessage`] records written to viewers.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub mod confidence;

pub use confidence::{clamp_confidence, heuristic_confidence, ConfidenceTier};

/// Shared error type for malformed records crossing crate boundaries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("multiplier must be a finite number of at least 0.01, got {0}")]
    InvalidMultiplier(f64),
    #[error("malformed server message: {0}")]
    MalformedMessage(String),
}

/// Identity of one viewer connection as seen by the broadcast hub.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which observer produced a candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// WebSocket frames exchanged by the monitored page.
    Frame,
    /// Periodic reads of the rendered page content.
    Poll,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Frame => "frame",
            SourceKind::Poll => "poll",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a value was obtained from a raw payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    StructuredField,
    PatternMatch,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::StructuredField => "structured_field",
            ExtractionMethod::PatternMatch => "pattern_match",
        }
    }
}

/// A positive, finite round multiplier.
///
/// Two multipliers denote the same displayed result when they agree at two
/// decimal places, which is how the monitored page renders them. Values that
/// would display as `0.00` are rejected.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Multiplier(f64);

impl Multiplier {
    pub fn new(value: f64) -> Result<Self, CoreError> {
        if value.is_finite() && (value * 100.0).round() >= 1.0 {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidMultiplier(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Value expressed in hundredths, the unit used for equality checks.
    pub fn hundredths(&self) -> i64 {
        (self.0 * 100.0).round() as i64
    }

    pub fn same_display_value(&self, other: &Multiplier) -> bool {
        self.hundredths() == other.hundredths()
    }

    /// Value rounded to the two-decimal display convention.
    pub fn rounded(&self) -> f64 {
        self.hundredths() as f64 / 100.0
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.rounded())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Multiplier::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Unprocessed payload handed from a source adapter to the extractor.
#[derive(Clone, Debug)]
pub struct RawCandidate {
    pub source: SourceKind,
    pub payload: String,
    pub observed_at: DateTime<Utc>,
}

impl RawCandidate {
    pub fn new(source: SourceKind, payload: impl Into<String>) -> Self {
        Self::observed(source, payload, Utc::now())
    }

    pub fn observed(
        source: SourceKind,
        payload: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            payload: payload.into(),
            observed_at,
        }
    }
}

/// Typed value produced by the extractor for one candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedValue {
    pub multiplier: Multiplier,
    pub source: SourceKind,
    pub observed_at: DateTime<Utc>,
    pub method: ExtractionMethod,
    /// Explicit confidence carried by a structured payload, if any.
    pub confidence: Option<f64>,
}

/// Canonical, externally visible round result.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundEvent {
    pub multiplier: Multiplier,
    pub confidence: Option<f64>,
    pub emitted_at: DateTime<Utc>,
    pub origin: SourceKind,
}

/// Acknowledgement sent once to every newly joined viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectedAck {
    pub status: String,
    pub ts: i64,
}

impl ConnectedAck {
    pub fn now() -> Self {
        Self {
            status: "connected".to_string(),
            ts: Utc::now().timestamp_millis(),
        }
    }
}

/// Wire form of a [`RoundEvent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundPayload {
    pub multiplier: Multiplier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
}

impl From<&RoundEvent> for RoundPayload {
    fn from(event: &RoundEvent) -> Self {
        Self {
            multiplier: event.multiplier,
            confidence: event.confidence,
            ts: event.emitted_at.timestamp_millis(),
            source: Some(event.origin),
        }
    }
}

impl RoundPayload {
    pub fn emitted_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.ts)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Every record the server writes to a viewer connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Round(RoundPayload),
    Connected(ConnectedAck),
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Connected(ConnectedAck::now())
    }

    pub fn round(event: &RoundEvent) -> Self {
        ServerMessage::Round(RoundPayload::from(event))
    }

    pub fn to_json(&self) -> String {
        // Both variants are plain structs of numbers and strings.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn parse(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|err| CoreError::MalformedMessage(err.to_string()))
    }
}

/// Milliseconds since the Unix epoch for "now".
pub fn timestamp_now() -> i64 {
    Utc::now().timestamp_millis()
}
