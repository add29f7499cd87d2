//! Producers feeding the intake queue.

use roundcast_core_types::{RawCandidate, SourceKind};
use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics;

mod cdp;
pub mod frame;
pub mod poll;

pub use cdp::{AdapterFrameFeed, AdapterProbe};
pub use frame::{frame_text, FrameFeed, FrameSource};
pub use poll::{ContentProbe, PollSource};

/// Availability change reported by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUpdate {
    pub source: SourceKind,
    pub available: bool,
    pub reason: String,
}

impl SourceUpdate {
    pub fn available(source: SourceKind) -> Self {
        Self {
            source,
            available: true,
            reason: String::from("delivering again"),
        }
    }

    pub fn unavailable(source: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            source,
            available: false,
            reason: reason.into(),
        }
    }
}

pub type UpdateSender = mpsc::UnboundedSender<SourceUpdate>;

/// Offers a candidate without waiting; returns `false` once the intake is closed.
pub(crate) fn offer(intake: &mpsc::Sender<RawCandidate>, candidate: RawCandidate) -> bool {
    let source = candidate.source;
    metrics::record_candidate(source);
    match intake.try_send(candidate) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            metrics::record_dropped(source);
            debug!(target: "normalizer", %source, "intake full; candidate dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

pub(crate) fn report(updates: &UpdateSender, update: SourceUpdate) {
    metrics::set_source_available(update.source, update.available);
    let _ = updates.send(update);
}
