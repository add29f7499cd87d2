//! Contract tests against a real Chromium binary. Ignored by default; run with
//! `ROUNDCAST_CDP_CONTRACT=1 cargo test -p cdp-adapter -- --ignored`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{event_bus, Cdp, CdpAdapter, CdpConfig, ContentQuery, RawEvent, Viewport};
use tokio::time::timeout;

fn contract_enabled() -> bool {
    env::var("ROUNDCAST_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

async fn setup_adapter() -> (Arc<CdpAdapter>, cdp_adapter::EventStream) {
    let (bus, rx) = event_bus(256);
    let adapter = Arc::new(CdpAdapter::new(CdpConfig::default(), bus).expect("chromium available"));
    Arc::clone(&adapter).start().await.expect("adapter start");
    (adapter, rx)
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set ROUNDCAST_CDP_CONTRACT=1"]
async fn contract_navigate_and_query_content() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (ROUNDCAST_CDP_CONTRACT not enabled)");
        return;
    }

    let (adapter, _rx) = setup_adapter().await;
    let page = adapter
        .create_page("about:blank")
        .await
        .expect("create page");
    adapter
        .set_device_metrics(page, Viewport::default())
        .await
        .expect("viewport");
    adapter
        .navigate(
            page,
            "data:text/html,<div class=\"crash-value\">4.12x</div>",
            Duration::from_secs(15),
        )
        .await
        .expect("navigate");

    let query = ContentQuery::new(vec![".missing".into(), ".crash-value".into()], 2000);
    let snapshot = adapter.query_content(page, &query).await.expect("query");
    assert_eq!(snapshot.text, "4.12x");
    assert_eq!(snapshot.rule.as_deref(), Some(".crash-value"));

    adapter.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set ROUNDCAST_CDP_CONTRACT=1"]
async fn contract_reports_page_lifecycle() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (ROUNDCAST_CDP_CONTRACT not enabled)");
        return;
    }

    let (adapter, mut rx) = setup_adapter().await;
    let page = adapter
        .create_page("https://example.com")
        .await
        .expect("create page");
    adapter.set_network_tap(page, true).await.expect("network tap");

    let opened = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(RawEvent::PageLifecycle { page: seen, .. }) = rx.recv().await {
                if seen == page {
                    break;
                }
            }
        }
    })
    .await;
    assert!(opened.is_ok(), "expected lifecycle events for the new page");
    adapter.shutdown().await;
}
