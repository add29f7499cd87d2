//! Per-page WebSocket frame tap.
//!
//! The CDP adapter feeds socket lifecycle and frame notifications into the
//! tap. The tap keeps cumulative counters per page, answers snapshot queries
//! and publishes a [`FrameSummary`] whenever a page opens or closes a socket
//! or flips between live and stale.

pub mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TapConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Identifier representing a page for which the tap is collecting data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary published on the bus when a page's socket picture changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameSummary {
    pub page: PageId,
    pub open_sockets: u64,
    pub frames: u64,
    pub bytes: u64,
    pub stale: bool,
    pub since_last_frame_ms: Option<u64>,
}

/// Cumulative counters exposed via the pull-based API.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub open_sockets: u64,
    pub frames: u64,
    pub bytes: u64,
    pub stale: bool,
    pub since_last_frame_ms: Option<u64>,
    pub socket_urls: Vec<String>,
}

#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("page not enabled")]
    PageNotEnabled,
}

/// WebSocket notifications understood by the tap.
#[derive(Clone, Debug)]
pub enum TapEvent {
    SocketCreated { request_id: String, url: String },
    FrameReceived { request_id: String, bytes: u64 },
    SocketClosed { request_id: String },
}

/// Broadcast channel for frame summaries.
pub type SummaryBus = broadcast::Sender<FrameSummary>;

#[derive(Debug)]
struct Counters {
    sockets: HashMap<String, String>,
    frames: u64,
    bytes: u64,
    last_frame: Option<Instant>,
    last_stale: bool,
}

impl Counters {
    fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            frames: 0,
            bytes: 0,
            last_frame: None,
            last_stale: true,
        }
    }

    /// Applies the event and reports whether the socket set changed.
    fn register(&mut self, event: &TapEvent, now: Instant) -> bool {
        match event {
            TapEvent::SocketCreated { request_id, url } => {
                self.sockets.insert(request_id.clone(), url.clone());
                true
            }
            TapEvent::FrameReceived { request_id, bytes } => {
                // Frames can race ahead of the creation notice after a reattach.
                self.sockets
                    .entry(request_id.clone())
                    .or_insert_with(String::new);
                self.frames += 1;
                self.bytes += bytes;
                self.last_frame = Some(now);
                false
            }
            TapEvent::SocketClosed { request_id } => self.sockets.remove(request_id).is_some(),
        }
    }

    fn since_last_frame(&self, now: Instant) -> Option<Duration> {
        self.last_frame
            .map(|at| now.saturating_duration_since(at))
    }

    fn stale(&self, now: Instant, config: &TapConfig) -> bool {
        if self.sockets.is_empty() {
            return true;
        }
        match self.since_last_frame(now) {
            Some(elapsed) => elapsed.as_millis() as u64 >= config.stale_after_ms,
            None => true,
        }
    }

    /// Records the current staleness and reports whether it flipped.
    fn stale_flipped(&mut self, stale: bool) -> bool {
        let flipped = stale != self.last_stale;
        self.last_stale = stale;
        flipped
    }

    fn build_summary(&self, page: PageId, stale: bool, now: Instant) -> FrameSummary {
        FrameSummary {
            page,
            open_sockets: self.sockets.len() as u64,
            frames: self.frames,
            bytes: self.bytes,
            stale,
            since_last_frame_ms: self
                .since_last_frame(now)
                .map(|elapsed| elapsed.as_millis() as u64),
        }
    }

    fn snapshot(&self, stale: bool, now: Instant) -> FrameSnapshot {
        let mut socket_urls: Vec<String> = self
            .sockets
            .values()
            .filter(|url| !url.is_empty())
            .cloned()
            .collect();
        socket_urls.sort();
        FrameSnapshot {
            open_sockets: self.sockets.len() as u64,
            frames: self.frames,
            bytes: self.bytes,
            stale,
            since_last_frame_ms: self
                .since_last_frame(now)
                .map(|elapsed| elapsed.as_millis() as u64),
            socket_urls,
        }
    }
}

/// Frame tap shared between the CDP event loop and status readers.
pub struct NetworkTapLight {
    pub bus: SummaryBus,
    states: DashMap<PageId, Arc<Mutex<Counters>>>,
    config: TapConfig,
}

/// Handle returned by [`NetworkTapLight::spawn_maintenance`] for lifecycle control.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the maintenance loop and await its completion.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            },
            None => Ok(()),
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl NetworkTapLight {
    pub fn new(buffer: usize) -> (Self, broadcast::Receiver<FrameSummary>) {
        Self::with_config(TapConfig::default(), buffer)
    }

    pub fn with_config(
        config: TapConfig,
        buffer: usize,
    ) -> (Self, broadcast::Receiver<FrameSummary>) {
        let (tx, rx) = broadcast::channel(buffer.max(1));
        (
            Self {
                bus: tx,
                states: DashMap::new(),
                config,
            },
            rx,
        )
    }

    /// Spawn a background task that periodically calls [`Self::evaluate_staleness`].
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let tap = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let tick = Duration::from_millis(self.config.maintenance_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => tap.evaluate_staleness().await,
                }
            }
        });
        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }

    pub fn enable(&self, page: PageId) {
        self.states
            .entry(page)
            .or_insert_with(|| Arc::new(Mutex::new(Counters::new())));
    }

    pub fn disable(&self, page: PageId) -> Result<(), TapError> {
        self.states
            .remove(&page)
            .map(|_| ())
            .ok_or(TapError::PageNotEnabled)
    }

    pub fn is_enabled(&self, page: PageId) -> bool {
        self.states.contains_key(&page)
    }

    pub fn publish_summary(&self, summary: FrameSummary) {
        let _ = self.bus.send(summary);
    }

    pub async fn current_snapshot(&self, page: PageId) -> Option<FrameSnapshot> {
        let state = self.states.get(&page)?.value().clone();
        let counters = state.lock().await;
        let now = Instant::now();
        let stale = counters.stale(now, &self.config);
        Some(counters.snapshot(stale, now))
    }

    /// Snapshot of every enabled page.
    pub async fn snapshots(&self) -> Vec<(PageId, FrameSnapshot)> {
        let pages: Vec<(PageId, Arc<Mutex<Counters>>)> = self
            .states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let now = Instant::now();
        let mut out = Vec::with_capacity(pages.len());
        for (page, state) in pages {
            let counters = state.lock().await;
            let stale = counters.stale(now, &self.config);
            out.push((page, counters.snapshot(stale, now)));
        }
        out
    }

    pub async fn ingest(&self, page: PageId, event: TapEvent) -> Result<(), TapError> {
        let state = self
            .states
            .get(&page)
            .ok_or(TapError::PageNotEnabled)?
            .value()
            .clone();
        let now = Instant::now();

        let mut counters = state.lock().await;
        let sockets_changed = counters.register(&event, now);
        let stale = counters.stale(now, &self.config);
        let flipped = counters.stale_flipped(stale);
        let summary = counters.build_summary(page, stale, now);
        drop(counters);

        if sockets_changed || flipped {
            debug!(
                target: "frame-tap",
                open_sockets = summary.open_sockets,
                stale = summary.stale,
                "frame summary"
            );
            self.publish_summary(summary);
        }
        Ok(())
    }

    pub async fn evaluate_staleness(&self) {
        let now = Instant::now();
        let pages: Vec<(PageId, Arc<Mutex<Counters>>)> = self
            .states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (page, state) in pages {
            let mut counters = state.lock().await;
            let stale = counters.stale(now, &self.config);
            if counters.stale_flipped(stale) {
                let summary = counters.build_summary(page, stale, now);
                drop(counters);
                self.publish_summary(summary);
            }
        }
    }
}
