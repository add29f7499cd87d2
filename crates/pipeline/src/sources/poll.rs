use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{ContentQuery, ContentSnapshot};
use roundcast_core_types::{RawCandidate, SourceKind};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{offer, report, SourceUpdate, UpdateSender};
use crate::config::PipelineConfig;
use crate::metrics;
use crate::PipelineError;

/// One read of the monitored page's rendered content.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn read(&self, query: &ContentQuery) -> Result<ContentSnapshot, PipelineError>;
}

pub struct PollSource {
    probe: Arc<dyn ContentProbe>,
    query: ContentQuery,
    every: Duration,
    deadline: Duration,
    failure_threshold: u32,
    intake: mpsc::Sender<RawCandidate>,
    updates: UpdateSender,
}

impl PollSource {
    pub fn new(
        config: &PipelineConfig,
        probe: Arc<dyn ContentProbe>,
        intake: mpsc::Sender<RawCandidate>,
        updates: UpdateSender,
    ) -> Self {
        Self {
            probe,
            query: ContentQuery::new(config.lookup_rules.clone(), config.fallback_chars),
            every: config.poll_interval(),
            deadline: config.poll_timeout(),
            failure_threshold: config.poll_failure_threshold.max(1),
            intake,
            updates,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures: u32 = 0;
        let mut available = true;
        info!(
            target: "poll-source",
            interval_ms = self.every.as_millis() as u64,
            rules = self.query.rules.len(),
            "poll source started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = timeout(self.deadline, self.probe.read(&self.query)) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(snapshot)) => {
                    failures = 0;
                    if !available {
                        available = true;
                        info!(target: "poll-source", "content reads succeeding again");
                        report(&self.updates, SourceUpdate::available(SourceKind::Poll));
                    }
                    if snapshot.text.trim().is_empty() {
                        trace!(target: "poll-source", "empty content");
                        continue;
                    }
                    trace!(
                        target: "poll-source",
                        rule = snapshot.rule.as_deref().unwrap_or("<body>"),
                        "content read"
                    );
                    if !offer(&self.intake, RawCandidate::new(SourceKind::Poll, snapshot.text)) {
                        break;
                    }
                    continue;
                }
                Ok(Err(err)) => {
                    metrics::record_poll_failure("error");
                    err.to_string()
                }
                Err(_) => {
                    metrics::record_poll_failure("timeout");
                    format!("read exceeded {} ms", self.deadline.as_millis())
                }
            };

            failures = failures.saturating_add(1);
            warn!(target: "poll-source", failures, error = %failure, "content read failed");
            if available && failures >= self.failure_threshold {
                available = false;
                warn!(target: "poll-source", failures, "poll source unavailable");
                report(
                    &self.updates,
                    SourceUpdate::unavailable(
                        SourceKind::Poll,
                        format!("{failures} consecutive failed reads: {failure}"),
                    ),
                );
            }
        }
        debug!(target: "poll-source", "poll source stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{AdapterError, AdapterErrorKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedProbe {
        steps: Mutex<VecDeque<Step>>,
    }

    impl ScriptedProbe {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
            })
        }
    }

    #[async_trait]
    impl ContentProbe for ScriptedProbe {
        async fn read(&self, _query: &ContentQuery) -> Result<ContentSnapshot, PipelineError> {
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Text(text)) => Ok(ContentSnapshot {
                    text: text.to_string(),
                    rule: Some(".crash-value".into()),
                }),
                Some(Step::Fail) => Err(AdapterError::new(AdapterErrorKind::CdpIo).into()),
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(ContentSnapshot::default()),
            }
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 10,
            poll_timeout_ms: Some(20),
            poll_failure_threshold: 2,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn forwards_non_empty_reads() {
        let probe = ScriptedProbe::new(vec![Step::Text(""), Step::Text("1.50x")]);
        let (intake, mut intake_rx) = mpsc::channel(8);
        let (updates, _updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(PollSource::new(&config(), probe, intake, updates).run(cancel.clone()));

        let candidate = intake_rx.recv().await.unwrap();
        assert_eq!(candidate.source, SourceKind::Poll);
        assert_eq!(candidate.payload, "1.50x");
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn consecutive_failures_flip_availability_until_a_read_succeeds() {
        let probe = ScriptedProbe::new(vec![
            Step::Fail,
            Step::Hang,
            Step::Fail,
            Step::Text("2.00"),
        ]);
        let (intake, mut intake_rx) = mpsc::channel(8);
        let (updates, mut updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(PollSource::new(&config(), probe, intake, updates).run(cancel.clone()));

        let down = updates_rx.recv().await.unwrap();
        assert_eq!(down.source, SourceKind::Poll);
        assert!(!down.available);
        assert!(down.reason.starts_with("2 consecutive"));

        let up = updates_rx.recv().await.unwrap();
        assert!(up.available);
        assert_eq!(intake_rx.recv().await.unwrap().payload, "2.00");

        cancel.cancel();
        task.await.unwrap();
    }
}
