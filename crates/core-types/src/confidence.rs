//! Display-only confidence bands.
//!
//! These numbers are a fixed lookup on multiplier magnitude. They are not an
//! estimate of anything and must only be used for presentation.

use serde::{Deserialize, Serialize};

use crate::Multiplier;

/// Magnitude band a multiplier falls into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub const HIGH_FROM_HUNDREDTHS: i64 = 300;
    pub const MEDIUM_FROM_HUNDREDTHS: i64 = 180;

    pub fn of(multiplier: &Multiplier) -> Self {
        match multiplier.hundredths() {
            h if h >= Self::HIGH_FROM_HUNDREDTHS => ConfidenceTier::High,
            h if h >= Self::MEDIUM_FROM_HUNDREDTHS => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        }
    }

    /// Fixed display value for the band.
    pub fn display_confidence(&self) -> f64 {
        match self {
            ConfidenceTier::High => 0.75,
            ConfidenceTier::Medium => 0.85,
            ConfidenceTier::Low => 0.60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
        }
    }
}

/// Heuristic confidence for a multiplier that arrived without one.
pub fn heuristic_confidence(multiplier: &Multiplier) -> f64 {
    ConfidenceTier::of(multiplier).display_confidence()
}

/// Clamp an explicit confidence into the displayable range, rejecting NaN.
pub fn clamp_confidence(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}
