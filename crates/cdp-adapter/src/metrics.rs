use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub events: u64,
    pub websocket_frames: u64,
    pub frame_summaries: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static WEBSOCKET_FRAMES: AtomicU64 = AtomicU64::new(0);
static FRAME_SUMMARIES: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("roundcast_cdp_commands_total", "Total CDP commands executed"),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "roundcast_cdp_command_failures_total",
            "Total CDP command failures"
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "roundcast_cdp_command_duration_seconds",
            "CDP command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_EVENTS_TOTAL: IntCounter =
        IntCounter::new("roundcast_cdp_events_total", "Total CDP events processed").unwrap();
    static ref CDP_WEBSOCKET_FRAMES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "roundcast_cdp_websocket_frames_total",
            "WebSocket frames observed on monitored pages"
        ),
        &["opcode"]
    )
    .unwrap();
    static ref CDP_FRAME_SUMMARIES_TOTAL: IntCounter = IntCounter::new(
        "roundcast_cdp_frame_summaries_total",
        "Frame tap summaries forwarded to subscribers",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_FAILURES_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
    register(registry, CDP_WEBSOCKET_FRAMES_TOTAL.clone());
    register(registry, CDP_FRAME_SUMMARIES_TOTAL.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    CDP_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    CDP_EVENTS_TOTAL.inc();
}

pub fn record_websocket_frame(opcode: u8) {
    WEBSOCKET_FRAMES.fetch_add(1, Ordering::Relaxed);
    let label = match opcode {
        1 => "text",
        2 => "binary",
        _ => "control",
    };
    CDP_WEBSOCKET_FRAMES_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_frame_summary() {
    FRAME_SUMMARIES.fetch_add(1, Ordering::Relaxed);
    CDP_FRAME_SUMMARIES_TOTAL.inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    CDP_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    CDP_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        websocket_frames: WEBSOCKET_FRAMES.load(Ordering::Relaxed),
        frame_summaries: FRAME_SUMMARIES.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    for counter in [
        &COMMANDS,
        &EVENTS,
        &WEBSOCKET_FRAMES,
        &FRAME_SUMMARIES,
        &COMMAND_SUCCESS,
        &COMMAND_FAILURES,
        &COMMAND_LATENCY_TOTAL_US,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}
