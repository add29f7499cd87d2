//! Viewer fan-out.
//!
//! The hub owns the membership map (`ConnectionId -> sink`). Every round is
//! serialized once and offered to each member through a non-blocking sink; a
//! member whose delivery fails is removed without affecting the others. There
//! is no buffering or replay: a member only sees rounds published while it is
//! a member.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use roundcast_core_types::{ConnectionId, RoundEvent, ServerMessage};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::metrics;
use crate::{BusError, EventBus};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("session connection is gone")]
    Disconnected,
    #[error("session outbound queue is full")]
    QueueFull,
}

impl DeliveryFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryFailure::Disconnected => "disconnected",
            DeliveryFailure::QueueFull => "queue_full",
        }
    }
}

/// Outbound half of one viewer connection.
///
/// `deliver` must not block. Dropping the last handle to a sink is how the
/// connection learns it was removed from the hub.
pub trait SessionSink: Send + Sync {
    fn deliver(&self, text: &str) -> Result<(), DeliveryFailure>;
}

impl SessionSink for mpsc::Sender<String> {
    fn deliver(&self, text: &str) -> Result<(), DeliveryFailure> {
        self.try_send(text.to_string()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }
}

/// Outcome of one publish.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
}

pub struct BroadcastHub {
    members: DashMap<ConnectionId, Arc<dyn SessionSink>>,
    local: broadcast::Sender<RoundEvent>,
}

impl BroadcastHub {
    pub fn new() -> Arc<Self> {
        let (local, _) = broadcast::channel(64);
        Arc::new(Self {
            members: DashMap::new(),
            local,
        })
    }

    /// Sends the connection acknowledgement, then adds the session.
    ///
    /// A session whose acknowledgement cannot be delivered is never added.
    pub fn join(&self, id: ConnectionId, sink: Arc<dyn SessionSink>) -> Result<(), DeliveryFailure> {
        let ack = ServerMessage::connected().to_json();
        if let Err(failure) = sink.deliver(&ack) {
            debug!(target: "hub", %id, reason = failure.as_str(), "ack failed; session not added");
            metrics::record_delivery_failure(failure);
            return Err(failure);
        }
        self.members.insert(id, sink);
        metrics::set_sessions(self.members.len());
        info!(target: "hub", %id, sessions = self.members.len(), "session joined");
        Ok(())
    }

    /// Removes a session; returns whether it was a member.
    pub fn leave(&self, id: ConnectionId) -> bool {
        let removed = self.members.remove(&id).is_some();
        if removed {
            metrics::set_sessions(self.members.len());
            info!(target: "hub", %id, sessions = self.members.len(), "session left");
        }
        removed
    }

    /// Delivers one round to every current member.
    pub fn publish(&self, event: &RoundEvent) -> PublishReport {
        let text = ServerMessage::round(event).to_json();
        let snapshot: Vec<(ConnectionId, Arc<dyn SessionSink>)> = self
            .members
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut report = PublishReport::default();
        for (id, sink) in snapshot {
            match sink.deliver(&text) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    metrics::record_delivery_failure(failure);
                    // Only drop the exact sink that failed; the id may have rejoined.
                    let removed = self
                        .members
                        .remove_if(&id, |_, current| Arc::ptr_eq(current, &sink))
                        .is_some();
                    if removed {
                        debug!(target: "hub", %id, reason = failure.as_str(), "delivery failed; session removed");
                        report.dropped.push(id);
                    }
                }
            }
        }

        metrics::record_deliveries(report.delivered);
        if !report.dropped.is_empty() {
            metrics::set_sessions(self.members.len());
        }
        let _ = self.local.send(event.clone());
        debug!(
            target: "hub",
            multiplier = %event.multiplier,
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "round published"
        );
        report
    }

    /// Drops every member; their connections observe the closed sink.
    pub fn close_all(&self) -> usize {
        let count = self.members.len();
        self.members.clear();
        metrics::set_sessions(0);
        if count > 0 {
            info!(target: "hub", closed = count, "closed all sessions");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }
}

#[async_trait]
impl EventBus<RoundEvent> for BroadcastHub {
    async fn publish(&self, event: RoundEvent) -> Result<(), BusError> {
        BroadcastHub::publish(self, &event);
        Ok(())
    }

    /// In-process observers of published rounds (not viewer sessions).
    fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.local.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roundcast_core_types::{Multiplier, SourceKind};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn failing() -> Arc<Self> {
            let sink = Arc::new(Self::default());
            sink.fail.store(true, Ordering::SeqCst);
            sink
        }

        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl SessionSink for RecordingSink {
        fn deliver(&self, text: &str) -> Result<(), DeliveryFailure> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryFailure::Disconnected);
            }
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn round(value: f64) -> RoundEvent {
        RoundEvent {
            multiplier: Multiplier::new(value).unwrap(),
            confidence: Some(0.85),
            emitted_at: Utc::now(),
            origin: SourceKind::Frame,
        }
    }

    #[test]
    fn join_sends_ack_before_membership() {
        let hub = BroadcastHub::new();
        let sink = Arc::new(RecordingSink::default());
        let id = ConnectionId::new();
        hub.join(id, sink.clone()).unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            ServerMessage::parse(&messages[0]).unwrap(),
            ServerMessage::Connected(_)
        ));
        assert!(hub.contains(id));
    }

    #[test]
    fn failed_ack_keeps_session_out() {
        let hub = BroadcastHub::new();
        let err = hub
            .join(ConnectionId::new(), RecordingSink::failing())
            .unwrap_err();
        assert_eq!(err, DeliveryFailure::Disconnected);
        assert!(hub.is_empty());
    }

    #[test]
    fn failing_member_is_removed_and_others_still_receive() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let c = Arc::new(RecordingSink::default());
        let a_id = ConnectionId::new();
        hub.join(a_id, a.clone()).unwrap();
        hub.join(ConnectionId::new(), b.clone()).unwrap();
        hub.join(ConnectionId::new(), c.clone()).unwrap();

        a.fail.store(true, Ordering::SeqCst);
        let report = hub.publish(&round(3.45));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![a_id]);
        assert_eq!(hub.len(), 2);
        assert_eq!(b.messages().len(), 2);
        assert_eq!(c.messages().len(), 2);
    }

    #[test]
    fn late_joiner_gets_no_history() {
        let hub = BroadcastHub::new();
        for value in [1.5, 2.25, 9.0] {
            hub.publish(&round(value));
        }
        let sink = Arc::new(RecordingSink::default());
        hub.join(ConnectionId::new(), sink.clone()).unwrap();
        assert_eq!(sink.messages().len(), 1, "only the ack");
    }

    #[test]
    fn per_session_order_matches_publish_order() {
        let hub = BroadcastHub::new();
        let sink = Arc::new(RecordingSink::default());
        hub.join(ConnectionId::new(), sink.clone()).unwrap();
        hub.publish(&round(2.10));
        hub.publish(&round(7.00));

        let values: Vec<i64> = sink.messages()[1..]
            .iter()
            .map(|text| match ServerMessage::parse(text).unwrap() {
                ServerMessage::Round(payload) => payload.multiplier.hundredths(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![210, 700]);
    }

    #[test]
    fn close_all_empties_membership() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel::<String>(4);
        hub.join(ConnectionId::new(), Arc::new(tx)).unwrap();
        assert!(rx.try_recv().is_ok());

        assert_eq!(hub.close_all(), 1);
        assert!(hub.is_empty());
        // The hub held the only sender; the connection now sees end of stream.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn full_queue_counts_as_delivery_failure() {
        let hub = BroadcastHub::new();
        let (tx, _rx) = mpsc::channel::<String>(1);
        let id = ConnectionId::new();
        hub.join(id, Arc::new(tx)).unwrap();
        let report = hub.publish(&round(1.80));
        assert_eq!(report.dropped, vec![id]);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn local_subscribers_observe_rounds() {
        let hub = BroadcastHub::new();
        let mut rx = EventBus::subscribe(hub.as_ref());
        EventBus::publish(hub.as_ref(), round(4.20)).await.unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.multiplier.hundredths(), 420);
    }
}
