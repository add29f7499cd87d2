//! Sources backed by the Chromium adapter.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{Cdp, CdpAdapter, ContentQuery, ContentSnapshot, PageId, RawEvent};
use tokio::sync::broadcast;

use super::{ContentProbe, FrameFeed};
use crate::PipelineError;

/// Frames the adapter observes on one page.
pub struct AdapterFrameFeed {
    adapter: Arc<CdpAdapter>,
    page: PageId,
}

impl AdapterFrameFeed {
    pub fn new(adapter: Arc<CdpAdapter>, page: PageId) -> Self {
        Self { adapter, page }
    }
}

impl FrameFeed for AdapterFrameFeed {
    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.adapter.subscribe()
    }

    fn page(&self) -> Option<PageId> {
        Some(self.page)
    }
}

/// Content reads evaluated in one page.
pub struct AdapterProbe {
    adapter: Arc<CdpAdapter>,
    page: PageId,
}

impl AdapterProbe {
    pub fn new(adapter: Arc<CdpAdapter>, page: PageId) -> Self {
        Self { adapter, page }
    }
}

#[async_trait]
impl ContentProbe for AdapterProbe {
    async fn read(&self, query: &ContentQuery) -> Result<ContentSnapshot, PipelineError> {
        Ok(self.adapter.query_content(self.page, query).await?)
    }
}
