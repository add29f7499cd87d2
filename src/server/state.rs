use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cdp_adapter::{CdpAdapter, FrameSnapshot, PageId};
use parking_lot::Mutex;
use roundcast_event_bus::BroadcastHub;
use roundcast_pipeline::PipelineReport;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Frame tap figures for the health report.
#[async_trait]
pub trait FrameTapView: Send + Sync {
    async fn frame_snapshot(&self) -> Option<FrameSnapshot>;
}

pub struct AdapterTapView {
    adapter: Arc<CdpAdapter>,
    page: PageId,
}

impl AdapterTapView {
    pub fn new(adapter: Arc<CdpAdapter>, page: PageId) -> Self {
        Self { adapter, page }
    }
}

#[async_trait]
impl FrameTapView for AdapterTapView {
    async fn frame_snapshot(&self) -> Option<FrameSnapshot> {
        self.adapter.frame_snapshot(self.page).await
    }
}

#[derive(Clone)]
pub struct RelayState {
    pub hub: Arc<BroadcastHub>,
    pub health: Arc<RelayHealth>,
    pub shutdown: CancellationToken,
    pub client_queue: usize,
    pipeline: Option<watch::Receiver<PipelineReport>>,
    frame_tap: Option<Arc<dyn FrameTapView>>,
}

impl RelayState {
    pub fn new(hub: Arc<BroadcastHub>, client_queue: usize, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            health: Arc::new(RelayHealth::new()),
            shutdown,
            client_queue: client_queue.max(1),
            pipeline: None,
            frame_tap: None,
        }
    }

    pub fn with_pipeline(mut self, status: watch::Receiver<PipelineReport>) -> Self {
        self.pipeline = Some(status);
        self
    }

    pub fn with_frame_tap(mut self, view: Arc<dyn FrameTapView>) -> Self {
        self.frame_tap = Some(view);
        self
    }

    pub async fn health_report(&self) -> HealthReport {
        let frame_tap = match &self.frame_tap {
            Some(view) => view.frame_snapshot().await,
            None => None,
        };
        HealthReport {
            live: self.health.is_live(),
            clients: self.hub.len(),
            uptime_secs: self.health.uptime_secs(),
            pipeline: self.pipeline.as_ref().map(|rx| rx.borrow().clone()),
            frame_tap,
            last_error: self.health.last_error(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub live: bool,
    pub clients: usize,
    pub uptime_secs: u64,
    pub pipeline: Option<PipelineReport>,
    pub frame_tap: Option<FrameSnapshot>,
    pub last_error: Option<String>,
}

pub struct RelayHealth {
    live: AtomicBool,
    started: Instant,
    last_error: Mutex<Option<String>>,
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHealth {
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(false),
            started: Instant::now(),
            last_error: Mutex::new(None),
        }
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_down(&self, error: impl Into<String>) {
        self.live.store(false, Ordering::SeqCst);
        *self.last_error.lock() = Some(error.into());
    }

    pub fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}
