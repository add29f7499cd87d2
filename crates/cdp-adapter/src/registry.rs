//! Pages known to the adapter and the CDP sessions attached to them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
}

impl PageContext {
    pub fn is_attached(&self) -> bool {
        self.cdp_session.is_some()
    }
}

#[derive(Default)]
pub struct PageRegistry {
    pages: DashMap<PageId, PageContext>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        self.pages.insert(
            page,
            PageContext {
                session_id: session,
                target_id,
                cdp_session,
                recent_url: None,
            },
        );
    }

    pub fn remove_page(&self, page: &PageId) -> Option<PageContext> {
        self.pages.remove(page).map(|(_, ctx)| ctx)
    }

    pub fn get(&self, page: &PageId) -> Option<PageContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn pages(&self) -> Vec<PageId> {
        self.pages.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn is_attached(&self, page: &PageId) -> bool {
        self.pages
            .get(page)
            .map(|entry| entry.is_attached())
            .unwrap_or(false)
    }

    pub fn clear(&self) -> Vec<PageId> {
        let pages = self.pages();
        self.pages.clear();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_attachment_and_urls() {
        let registry = PageRegistry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), Some("t-1".into()), None);
        assert!(!registry.is_attached(&page));

        registry.set_cdp_session(&page, "s-1".into());
        registry.set_recent_url(&page, "https://game.example/".into());
        let ctx = registry.get(&page).expect("page registered");
        assert_eq!(ctx.cdp_session.as_deref(), Some("s-1"));
        assert_eq!(ctx.recent_url.as_deref(), Some("https://game.example/"));

        assert_eq!(registry.clear(), vec![page]);
        assert!(registry.is_empty());
    }
}
