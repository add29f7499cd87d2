//! Round de-duplication.
//!
//! Both sources usually observe the same round, frames first and the poll a
//! little later. A value equal (at display precision) to the last emitted one
//! and observed within the coalescing window of the anchor is a repeat.

use chrono::{DateTime, Duration, Utc};
use roundcast_core_types::{heuristic_confidence, ExtractedValue, Multiplier, RoundEvent};
use tracing::{debug, trace};

use crate::config::{CoalesceAnchor, PipelineConfig};

#[derive(Clone, Copy, Debug)]
struct LastRound {
    multiplier: Multiplier,
    anchor_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    anchor: CoalesceAnchor,
    last: Option<LastRound>,
    emitted: u64,
    suppressed: u64,
}

impl Deduplicator {
    pub fn new(window: std::time::Duration, anchor: CoalesceAnchor) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::days(365)),
            anchor,
            last: None,
            emitted: 0,
            suppressed: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.coalesce_window(), config.coalesce_anchor)
    }

    /// Decides one extracted value; `Some` means a new round.
    pub fn record(&mut self, value: ExtractedValue) -> Option<RoundEvent> {
        if let Some(last) = self.last.as_mut() {
            let gap = if value.observed_at >= last.anchor_at {
                value.observed_at - last.anchor_at
            } else {
                last.anchor_at - value.observed_at
            };
            if last.multiplier.same_display_value(&value.multiplier) && gap <= self.window {
                if self.anchor == CoalesceAnchor::LastSighting && value.observed_at > last.anchor_at
                {
                    last.anchor_at = value.observed_at;
                }
                self.suppressed += 1;
                trace!(
                    target: "normalizer",
                    multiplier = %value.multiplier,
                    source = %value.source,
                    gap_ms = gap.num_milliseconds(),
                    "duplicate suppressed"
                );
                return None;
            }
        }

        self.last = Some(LastRound {
            multiplier: value.multiplier,
            anchor_at: value.observed_at,
        });
        self.emitted += 1;
        let confidence = value
            .confidence
            .unwrap_or_else(|| heuristic_confidence(&value.multiplier));
        debug!(
            target: "normalizer",
            multiplier = %value.multiplier,
            origin = %value.source,
            method = value.method.as_str(),
            "new round"
        );
        Some(RoundEvent {
            multiplier: value.multiplier,
            confidence: Some(confidence),
            emitted_at: Utc::now(),
            origin: value.source,
        })
    }

    pub fn last_multiplier(&self) -> Option<Multiplier> {
        self.last.map(|last| last.multiplier)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
