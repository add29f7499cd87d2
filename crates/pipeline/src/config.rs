use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Lookup order for the page content read, most specific first.
pub const DEFAULT_LOOKUP_RULES: [&str; 7] = [
    "[data-test*=\"multiplier\"]",
    "[class*=\"multiplier\"]",
    ".crash-value",
    ".round-result",
    ".last-result",
    ".result-number",
    ".amount",
];

/// What the coalescing window is measured from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalesceAnchor {
    /// The observation that produced the last emitted round.
    Emission,
    /// The most recent sighting of the last emitted value, duplicates included.
    #[default]
    LastSighting,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    /// Bound on one content read; `None` uses the poll interval.
    pub poll_timeout_ms: Option<u64>,
    pub poll_failure_threshold: u32,
    /// Explicit coalescing window; `None` derives one from the poll timing.
    pub coalesce_window_ms: Option<u64>,
    pub coalesce_anchor: CoalesceAnchor,
    pub lookup_rules: Vec<String>,
    pub fallback_chars: usize,
    pub intake_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            poll_timeout_ms: None,
            poll_failure_threshold: 5,
            coalesce_window_ms: None,
            coalesce_anchor: CoalesceAnchor::LastSighting,
            lookup_rules: DEFAULT_LOOKUP_RULES.iter().map(|r| r.to_string()).collect(),
            fallback_chars: 2_000,
            intake_capacity: 256,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.poll_timeout_ms == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "poll_timeout_ms must be positive".into(),
            ));
        }
        if self.poll_failure_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_failure_threshold must be at least 1".into(),
            ));
        }
        if let Some(window_ms) = self.coalesce_window_ms {
            let floor = self.poll_interval_ms.saturating_add(self.effective_poll_timeout_ms());
            if window_ms < floor {
                return Err(PipelineError::InvalidConfig(format!(
                    "coalesce_window_ms ({window_ms}) must cover one poll interval plus its timeout ({floor})"
                )));
            }
        }
        if self.intake_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "intake_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.effective_poll_timeout_ms())
    }

    fn effective_poll_timeout_ms(&self) -> u64 {
        self.poll_timeout_ms.unwrap_or(self.poll_interval_ms)
    }

    /// A poll sighting lands up to one timeout after its tick, and one failed
    /// read can separate two sightings, so the derived window spans two
    /// intervals plus a timeout.
    pub fn coalesce_window(&self) -> Duration {
        let derived = self
            .poll_interval_ms
            .saturating_mul(2)
            .saturating_add(self.effective_poll_timeout_ms());
        Duration::from_millis(self.coalesce_window_ms.unwrap_or(derived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.poll_timeout(), cfg.poll_interval());
        assert_eq!(cfg.coalesce_window(), Duration::from_secs(6));
        assert_eq!(cfg.coalesce_anchor, CoalesceAnchor::LastSighting);
        assert_eq!(cfg.lookup_rules.len(), 7);
        assert_eq!(cfg.lookup_rules[2], ".crash-value");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = PipelineConfig {
            poll_interval_ms: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn derived_window_follows_poll_timing() {
        let cfg = PipelineConfig {
            poll_interval_ms: 5_000,
            poll_timeout_ms: Some(1_000),
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.coalesce_window(), Duration::from_secs(11));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn window_shorter_than_a_poll_cycle_is_rejected() {
        let cfg = PipelineConfig {
            poll_interval_ms: 2_000,
            coalesce_window_ms: Some(2_000),
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::InvalidConfig(_))));

        let raised_interval = PipelineConfig {
            poll_interval_ms: 5_000,
            coalesce_window_ms: Some(4_000),
            ..PipelineConfig::default()
        };
        assert!(raised_interval.validate().is_err());

        let covering = PipelineConfig {
            poll_interval_ms: 2_000,
            poll_timeout_ms: Some(500),
            coalesce_window_ms: Some(2_500),
            ..PipelineConfig::default()
        };
        assert!(covering.validate().is_ok());
    }

    #[test]
    fn anchor_parses_from_snake_case() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"coalesce_anchor":"emission","poll_timeout_ms":500}"#)
                .unwrap();
        assert_eq!(cfg.coalesce_anchor, CoalesceAnchor::Emission);
        assert_eq!(cfg.poll_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.poll_interval_ms, 2_000);
    }
}
