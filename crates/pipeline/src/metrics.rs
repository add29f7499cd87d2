use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use roundcast_core_types::{ExtractionMethod, SourceKind};
use tracing::error;

lazy_static! {
    static ref CANDIDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "roundcast_pipeline_candidates_total",
            "Raw candidates offered to the intake queue"
        ),
        &["source"]
    )
    .unwrap();
    static ref CANDIDATES_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "roundcast_pipeline_candidates_dropped_total",
            "Candidates dropped because the intake queue was full"
        ),
        &["source"]
    )
    .unwrap();
    static ref EXTRACTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "roundcast_pipeline_extracted_total",
            "Values recovered from candidates"
        ),
        &["method"]
    )
    .unwrap();
    static ref ROUNDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("roundcast_pipeline_rounds_total", "Rounds emitted"),
        &["origin"]
    )
    .unwrap();
    static ref DUPLICATES_TOTAL: IntCounter = IntCounter::new(
        "roundcast_pipeline_duplicates_total",
        "Values suppressed as repeats of the last round"
    )
    .unwrap();
    static ref POLL_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "roundcast_pipeline_poll_failures_total",
            "Content reads that failed or timed out"
        ),
        &["reason"]
    )
    .unwrap();
    static ref SOURCE_AVAILABLE: IntGaugeVec = IntGaugeVec::new(
        Opts::new(
            "roundcast_pipeline_source_available",
            "1 while the source is delivering, 0 otherwise"
        ),
        &["source"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register pipeline metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CANDIDATES_TOTAL.clone());
    register(registry, CANDIDATES_DROPPED_TOTAL.clone());
    register(registry, EXTRACTED_TOTAL.clone());
    register(registry, ROUNDS_TOTAL.clone());
    register(registry, DUPLICATES_TOTAL.clone());
    register(registry, POLL_FAILURES_TOTAL.clone());
    register(registry, SOURCE_AVAILABLE.clone());
}

pub(crate) fn record_candidate(source: SourceKind) {
    CANDIDATES_TOTAL.with_label_values(&[source.as_str()]).inc();
}

pub(crate) fn record_dropped(source: SourceKind) {
    CANDIDATES_DROPPED_TOTAL
        .with_label_values(&[source.as_str()])
        .inc();
}

pub(crate) fn record_extracted(method: ExtractionMethod) {
    EXTRACTED_TOTAL.with_label_values(&[method.as_str()]).inc();
}

pub(crate) fn record_round(origin: SourceKind) {
    ROUNDS_TOTAL.with_label_values(&[origin.as_str()]).inc();
}

pub(crate) fn record_duplicate() {
    DUPLICATES_TOTAL.inc();
}

pub(crate) fn record_poll_failure(reason: &str) {
    POLL_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub(crate) fn set_source_available(source: SourceKind, available: bool) {
    SOURCE_AVAILABLE
        .with_label_values(&[source.as_str()])
        .set(available as i64);
}

/// Rounds emitted so far for one origin.
pub fn rounds_emitted(origin: SourceKind) -> u64 {
    ROUNDS_TOTAL.with_label_values(&[origin.as_str()]).get()
}
