//! Task wiring: sources, intake queue, normalizer and status channel.

use std::sync::Arc;

use roundcast_core_types::{RawCandidate, RoundEvent, RoundPayload, SourceKind};
use roundcast_event_bus::EventBus;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::extractor::ValueExtractor;
use crate::metrics;
use crate::normalizer::Deduplicator;
use crate::sources::{ContentProbe, FrameFeed, FrameSource, PollSource, SourceUpdate};
use crate::PipelineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Degraded { unavailable: Vec<SourceKind> },
    /// Every configured source is unavailable. The pipeline keeps running but
    /// nothing will be emitted until one recovers.
    AllSourcesLost,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceState {
    pub source: SourceKind,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Snapshot published on the status watch channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub sources: Vec<SourceState>,
    pub rounds_emitted: u64,
    pub duplicates_suppressed: u64,
    pub last_round: Option<RoundPayload>,
}

impl PipelineReport {
    fn new(sources: &[SourceKind]) -> Self {
        Self {
            status: PipelineStatus::Running,
            sources: sources
                .iter()
                .map(|source| SourceState {
                    source: *source,
                    available: true,
                    reason: None,
                })
                .collect(),
            rounds_emitted: 0,
            duplicates_suppressed: 0,
            last_round: None,
        }
    }

    pub fn source(&self, kind: SourceKind) -> Option<&SourceState> {
        self.sources.iter().find(|state| state.source == kind)
    }

    fn apply(&mut self, update: SourceUpdate) {
        if let Some(state) = self.sources.iter_mut().find(|s| s.source == update.source) {
            state.available = update.available;
            state.reason = (!update.available).then_some(update.reason);
        }
        let unavailable: Vec<SourceKind> = self
            .sources
            .iter()
            .filter(|state| !state.available)
            .map(|state| state.source)
            .collect();
        self.status = if unavailable.is_empty() {
            PipelineStatus::Running
        } else if unavailable.len() == self.sources.len() {
            PipelineStatus::AllSourcesLost
        } else {
            PipelineStatus::Degraded { unavailable }
        };
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    extractor: ValueExtractor,
    sink: Arc<dyn EventBus<RoundEvent>>,
    frames: Option<Arc<dyn FrameFeed>>,
    probe: Option<Arc<dyn ContentProbe>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn EventBus<RoundEvent>>) -> Self {
        Self {
            config,
            extractor: ValueExtractor::default(),
            sink,
            frames: None,
            probe: None,
        }
    }

    pub fn with_frames(mut self, feed: Arc<dyn FrameFeed>) -> Self {
        self.frames = Some(feed);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ContentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_extractor(mut self, extractor: ValueExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Starts every task; they stop when `shutdown` (or the handle) is cancelled.
    pub fn spawn(self, shutdown: &CancellationToken) -> Result<PipelineHandle, PipelineError> {
        self.config.validate()?;
        if self.frames.is_none() && self.probe.is_none() {
            return Err(PipelineError::NoSources);
        }

        let cancel = shutdown.child_token();
        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let mut kinds = Vec::new();
        let mut tasks = Vec::new();

        if let Some(feed) = self.frames {
            kinds.push(SourceKind::Frame);
            metrics::set_source_available(SourceKind::Frame, true);
            let source = FrameSource::new(feed, intake_tx.clone(), updates_tx.clone());
            tasks.push(tokio::spawn(source.run(cancel.clone())));
        }
        if let Some(probe) = self.probe {
            kinds.push(SourceKind::Poll);
            metrics::set_source_available(SourceKind::Poll, true);
            let source = PollSource::new(&self.config, probe, intake_tx.clone(), updates_tx.clone());
            tasks.push(tokio::spawn(source.run(cancel.clone())));
        }
        drop(intake_tx);
        drop(updates_tx);

        let (status_tx, status_rx) = watch::channel(PipelineReport::new(&kinds));
        let normalizer = Normalizer {
            extractor: self.extractor,
            dedup: Deduplicator::from_config(&self.config),
            sink: self.sink,
            status: status_tx,
        };
        tasks.push(tokio::spawn(normalizer.run(
            intake_rx,
            updates_rx,
            cancel.clone(),
        )));

        info!(
            target: "normalizer",
            sources = ?kinds,
            window_ms = self.config.coalesce_window().as_millis() as u64,
            anchor = ?self.config.coalesce_anchor,
            "pipeline started"
        );
        Ok(PipelineHandle {
            cancel,
            tasks,
            status: status_rx,
        })
    }
}

struct Normalizer {
    extractor: ValueExtractor,
    dedup: Deduplicator,
    sink: Arc<dyn EventBus<RoundEvent>>,
    status: watch::Sender<PipelineReport>,
}

impl Normalizer {
    async fn run(
        mut self,
        mut intake: mpsc::Receiver<RawCandidate>,
        mut updates: mpsc::UnboundedReceiver<SourceUpdate>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(update) = updates.recv() => self.apply_update(update),
                candidate = intake.recv() => match candidate {
                    Some(candidate) => self.process(candidate).await,
                    None => break,
                },
            }
        }
        self.status.send_modify(|report| report.status = PipelineStatus::Stopped);
        debug!(target: "normalizer", "normalizer stopped");
    }

    fn apply_update(&mut self, update: SourceUpdate) {
        let mut lost = false;
        self.status.send_modify(|report| {
            let before = report.status.clone();
            report.apply(update);
            lost = report.status == PipelineStatus::AllSourcesLost
                && before != PipelineStatus::AllSourcesLost;
        });
        if lost {
            error!(target: "normalizer", "all sources lost");
        }
    }

    async fn process(&mut self, candidate: RawCandidate) {
        let Some(value) = self.extractor.extract(&candidate) else {
            return;
        };
        metrics::record_extracted(value.method);
        let Some(event) = self.dedup.record(value) else {
            metrics::record_duplicate();
            self.status
                .send_modify(|report| report.duplicates_suppressed += 1);
            return;
        };

        metrics::record_round(event.origin);
        let payload = RoundPayload::from(&event);
        self.status.send_modify(|report| {
            report.rounds_emitted += 1;
            report.last_round = Some(payload);
        });
        if let Err(err) = self.sink.publish(event).await {
            warn!(target: "normalizer", %err, "round not published");
        }
    }
}

pub struct PipelineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    status: watch::Receiver<PipelineReport>,
}

impl PipelineHandle {
    pub fn status(&self) -> watch::Receiver<PipelineReport> {
        self.status.clone()
    }

    pub fn report(&self) -> PipelineReport {
        self.status.borrow().clone()
    }

    /// Cancels every task and waits for them. No queued candidate is drained.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(target: "normalizer", %err, "pipeline task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_configured_sources() {
        let mut report = PipelineReport::new(&[SourceKind::Frame, SourceKind::Poll]);
        report.apply(SourceUpdate::unavailable(SourceKind::Frame, "reset"));
        assert_eq!(
            report.status,
            PipelineStatus::Degraded {
                unavailable: vec![SourceKind::Frame]
            }
        );
        assert_eq!(
            report.source(SourceKind::Frame).and_then(|s| s.reason.as_deref()),
            Some("reset")
        );
        report.apply(SourceUpdate::unavailable(SourceKind::Poll, "timeouts"));
        assert_eq!(report.status, PipelineStatus::AllSourcesLost);
        report.apply(SourceUpdate::available(SourceKind::Poll));
        assert_eq!(
            report.status,
            PipelineStatus::Degraded {
                unavailable: vec![SourceKind::Frame]
            }
        );
    }

    #[test]
    fn single_source_loss_is_total_loss() {
        let mut report = PipelineReport::new(&[SourceKind::Poll]);
        report.apply(SourceUpdate::unavailable(SourceKind::Poll, "timeouts"));
        assert_eq!(report.status, PipelineStatus::AllSourcesLost);
    }

    #[test]
    fn report_serializes_status_tag() {
        let report = PipelineReport::new(&[SourceKind::Frame]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["state"], "running");
        assert_eq!(json["sources"][0]["source"], "frame");
    }
}
