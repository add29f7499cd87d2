use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cdp_adapter::{PageId, RawEvent};
use roundcast_core_types::{RawCandidate, SourceKind};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{offer, report, SourceUpdate, UpdateSender};

/// Subscription to the page automation event stream.
pub trait FrameFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;

    /// Page whose frames are forwarded; `None` forwards every page.
    fn page(&self) -> Option<PageId> {
        None
    }
}

impl FrameFeed for broadcast::Sender<RawEvent> {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        broadcast::Sender::subscribe(self)
    }
}

/// Text carried by a frame: opcode 1 as-is, opcode 2 when it decodes to UTF-8.
pub fn frame_text(opcode: u8, payload: &str) -> Option<String> {
    match opcode {
        1 => Some(payload.to_string()),
        2 => {
            let bytes = STANDARD.decode(payload.as_bytes()).ok()?;
            String::from_utf8(bytes).ok()
        }
        _ => None,
    }
}

pub struct FrameSource {
    feed: Arc<dyn FrameFeed>,
    intake: mpsc::Sender<RawCandidate>,
    updates: UpdateSender,
    resubscribe_after: Duration,
}

impl FrameSource {
    pub fn new(
        feed: Arc<dyn FrameFeed>,
        intake: mpsc::Sender<RawCandidate>,
        updates: UpdateSender,
    ) -> Self {
        Self {
            feed,
            intake,
            updates,
            resubscribe_after: Duration::from_secs(1),
        }
    }

    pub fn with_resubscribe_after(mut self, delay: Duration) -> Self {
        self.resubscribe_after = delay;
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        let page = self.feed.page();
        let mut rx = self.feed.subscribe();
        let mut available = true;
        info!(target: "frame-source", page = ?page, "frame source started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(RawEvent::WebSocketFrame {
                    page: seen,
                    opcode,
                    payload,
                    ..
                }) => {
                    if page.is_some_and(|wanted| wanted != seen) {
                        continue;
                    }
                    if !available {
                        available = true;
                        info!(target: "frame-source", "frames flowing again");
                        report(&self.updates, SourceUpdate::available(SourceKind::Frame));
                    }
                    let Some(text) = frame_text(opcode, &payload) else {
                        debug!(target: "frame-source", opcode, "skipping non-text frame");
                        continue;
                    };
                    if !offer(&self.intake, RawCandidate::new(SourceKind::Frame, text)) {
                        break;
                    }
                }
                Ok(RawEvent::TransportReset { message }) => {
                    if available {
                        available = false;
                        warn!(target: "frame-source", %message, "frame source unavailable");
                        report(
                            &self.updates,
                            SourceUpdate::unavailable(SourceKind::Frame, message),
                        );
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "frame-source", skipped, "frame subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if available {
                        available = false;
                        warn!(target: "frame-source", "event stream closed; frame source unavailable");
                        report(
                            &self.updates,
                            SourceUpdate::unavailable(SourceKind::Frame, "event stream closed"),
                        );
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.resubscribe_after) => {}
                    }
                    rx = self.feed.subscribe();
                }
            }
        }
        debug!(target: "frame-source", "frame source stopped");
    }
}
