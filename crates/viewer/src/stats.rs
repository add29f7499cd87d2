//! Rolling history and the cosmetic statistics derived from it.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use roundcast_core_types::{clamp_confidence, heuristic_confidence, Multiplier, RoundPayload};
use serde::Serialize;

pub const HISTORY_CAP: usize = 30;
/// Rounds strictly above this many hundredths are flagged as spikes.
pub const SPIKE_ABOVE_HUNDREDTHS: i64 = 500;
const HIGH_SHARE_FROM_HUNDREDTHS: i64 = 200;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub multiplier: Multiplier,
    pub confidence: f64,
    /// `true` when the confidence was filled in from the magnitude tiers.
    pub heuristic: bool,
    pub spike: bool,
    pub received_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_payload(payload: &RoundPayload) -> Self {
        let (confidence, heuristic) = match payload.confidence.and_then(clamp_confidence) {
            Some(value) => (value, false),
            None => (heuristic_confidence(&payload.multiplier), true),
        };
        Self {
            multiplier: payload.multiplier,
            confidence,
            heuristic,
            spike: payload.multiplier.hundredths() > SPIKE_ABOVE_HUNDREDTHS,
            received_at: Utc::now(),
        }
    }

    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x  Confidence: {}%",
            self.multiplier,
            self.confidence_percent()
        )
    }
}

/// One history line: time, value, confidence and a spike marker.
pub fn history_line(entry: &HistoryEntry) -> String {
    let time = entry.received_at.with_timezone(&Local).format("%H:%M:%S");
    let marker = if entry.spike { "  spike" } else { "" };
    format!(
        "{time}  {}x  {}% conf{marker}",
        entry.multiplier,
        entry.confidence_percent()
    )
}

/// Newest-first history capped at [`HISTORY_CAP`].
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(HISTORY_CAP);
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Presentation statistics over the retained history. Not an estimate of
/// anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DisplayStats {
    pub total: u64,
    pub count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub share_at_least_two: Option<f64>,
    pub mean_confidence: Option<f64>,
}

impl DisplayStats {
    pub fn compute(history: &History, total: u64) -> Self {
        let count = history.len();
        if count == 0 {
            return Self {
                total,
                ..Self::default()
            };
        }
        let values: Vec<f64> = history.entries().map(|e| e.multiplier.rounded()).collect();
        let n = count as f64;
        let high = history
            .entries()
            .filter(|e| e.multiplier.hundredths() >= HIGH_SHARE_FROM_HUNDREDTHS)
            .count();
        Self {
            total,
            count,
            mean: Some(values.iter().sum::<f64>() / n),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            share_at_least_two: Some(high as f64 / n),
            mean_confidence: Some(history.entries().map(|e| e.confidence).sum::<f64>() / n),
        }
    }
}

impl fmt::Display for DisplayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rounds: {} (showing {})", self.total, self.count)?;
        if let (Some(mean), Some(min), Some(max)) = (self.mean, self.min, self.max) {
            write!(f, "  mean {mean:.2}x  min {min:.2}x  max {max:.2}x")?;
        }
        if let Some(share) = self.share_at_least_two {
            write!(f, "  >=2.00x {:.0}%", share * 100.0)?;
        }
        if let Some(conf) = self.mean_confidence {
            write!(f, "  avg confidence {:.0}% (heuristic)", conf * 100.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: f64, confidence: Option<f64>) -> RoundPayload {
        RoundPayload {
            multiplier: Multiplier::new(value).unwrap(),
            confidence,
            ts: 0,
            source: None,
        }
    }

    #[test]
    fn entry_formats_like_the_dashboard() {
        let entry = HistoryEntry::from_payload(&payload(3.45, Some(0.85)));
        assert_eq!(entry.to_string(), "3.45x  Confidence: 85%");
        assert!(!entry.heuristic);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let high = HistoryEntry::from_payload(&payload(2.50, Some(5.0)));
        assert_eq!(high.to_string(), "2.50x  Confidence: 100%");
        let low = HistoryEntry::from_payload(&payload(2.50, Some(-0.3)));
        assert_eq!(low.confidence_percent(), 0);
        assert!(!low.heuristic);
    }

    #[test]
    fn missing_confidence_uses_tiers() {
        let entry = HistoryEntry::from_payload(&payload(1.20, None));
        assert_eq!(entry.confidence, 0.60);
        assert!(entry.heuristic);
    }

    #[test]
    fn spike_is_strictly_above_five() {
        assert!(!HistoryEntry::from_payload(&payload(5.00, None)).spike);
        assert!(HistoryEntry::from_payload(&payload(5.01, None)).spike);
        let line = history_line(&HistoryEntry::from_payload(&payload(12.0, Some(0.75))));
        assert!(line.ends_with("12.00x  75% conf  spike"));
    }

    #[test]
    fn history_is_capped_newest_first() {
        let mut history = History::default();
        for i in 1..=35 {
            history.push(HistoryEntry::from_payload(&payload(i as f64, None)));
        }
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history.latest().unwrap().multiplier.hundredths(), 3_500);
        assert_eq!(
            history.entries().last().unwrap().multiplier.hundredths(),
            600
        );
    }

    #[test]
    fn stats_over_history() {
        let mut history = History::default();
        for (value, conf) in [(1.50, 0.6), (2.00, 0.8), (4.50, 0.7)] {
            history.push(HistoryEntry::from_payload(&payload(value, Some(conf))));
        }
        let stats = DisplayStats::compute(&history, 3);
        assert_eq!(stats.count, 3);
        assert!((stats.mean.unwrap() - 8.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.min, Some(1.5));
        assert_eq!(stats.max, Some(4.5));
        assert!((stats.share_at_least_two.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.mean_confidence.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_only_report_total() {
        let stats = DisplayStats::compute(&History::default(), 0);
        assert_eq!(stats, DisplayStats::default());
        assert_eq!(stats.to_string(), "rounds: 0 (showing 0)");
    }
}
