use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

use crate::hub::DeliveryFailure;

lazy_static! {
    static ref HUB_SESSIONS: IntGauge =
        IntGauge::new("roundcast_hub_sessions", "Viewer sessions currently joined").unwrap();
    static ref HUB_DELIVERIES_TOTAL: IntCounter = IntCounter::new(
        "roundcast_hub_deliveries_total",
        "Round messages handed to viewer sessions"
    )
    .unwrap();
    static ref HUB_DELIVERY_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "roundcast_hub_delivery_failures_total",
            "Deliveries that removed a viewer session"
        ),
        &["reason"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register hub metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, HUB_SESSIONS.clone());
    register(registry, HUB_DELIVERIES_TOTAL.clone());
    register(registry, HUB_DELIVERY_FAILURES_TOTAL.clone());
}

pub(crate) fn set_sessions(count: usize) {
    HUB_SESSIONS.set(count as i64);
}

pub(crate) fn record_deliveries(count: usize) {
    HUB_DELIVERIES_TOTAL.inc_by(count as u64);
}

pub(crate) fn record_delivery_failure(failure: DeliveryFailure) {
    HUB_DELIVERY_FAILURES_TOTAL
        .with_label_values(&[failure.as_str()])
        .inc();
}
