use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use cdp_adapter::{event_bus, Cdp, CdpAdapter, PageId, Viewport};
use clap::Args;
use roundcast_event_bus::BroadcastHub;
use roundcast_pipeline::{
    AdapterFrameFeed, AdapterProbe, Pipeline, PipelineReport, PipelineStatus,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use super::context::CliContext;
use crate::config::RelayConfig;
use crate::server::{run_server, AdapterTapView, RelayState};

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Page to monitor (overrides target_url / TARGET_URL)
    #[arg(long)]
    pub target: Option<String>,

    /// Port for viewer connections
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Content poll interval in milliseconds
    #[arg(long = "poll-ms")]
    pub poll_ms: Option<u64>,

    /// Window within which a repeated value counts as the same round
    #[arg(long = "coalesce-ms")]
    pub coalesce_ms: Option<u64>,

    /// Attach to an existing Chrome DevTools websocket instead of launching
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(target) = &self.target {
            config.target_url = Some(target.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(poll_ms) = self.poll_ms {
            config.pipeline.poll_interval_ms = poll_ms;
        }
        if let Some(coalesce_ms) = self.coalesce_ms {
            config.pipeline.coalesce_window_ms = Some(coalesce_ms);
        }
        if let Some(ws_url) = &self.ws_url {
            config.browser.websocket_url = Some(ws_url.clone());
        }
        if self.headed {
            config.browser.headless = false;
        }
    }
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.apply(&mut config);
    config.validate()?;
    let target = config.target()?;

    let (bus, _) = event_bus(1024);
    let adapter = Arc::new(
        CdpAdapter::new(config.browser.clone(), bus).context("failed to set up the browser adapter")?,
    );
    if adapter.mode().is_stub() {
        bail!("no Chromium executable found; set ROUNDCAST_CHROME or browser.executable");
    }
    Arc::clone(&adapter)
        .start()
        .await
        .context("failed to start the browser")?;
    let page = prepare_page(&adapter, &config, &target).await?;

    let shutdown = CancellationToken::new();
    let hub = BroadcastHub::new();
    let pipeline = Pipeline::new(config.pipeline.clone(), hub.clone())
        .with_frames(Arc::new(AdapterFrameFeed::new(Arc::clone(&adapter), page)))
        .with_probe(Arc::new(AdapterProbe::new(Arc::clone(&adapter), page)))
        .spawn(&shutdown)?;
    let mut status = pipeline.status();

    let state = RelayState::new(hub.clone(), config.client_queue, shutdown.clone())
        .with_pipeline(pipeline.status())
        .with_frame_tap(Arc::new(AdapterTapView::new(Arc::clone(&adapter), page)));
    let health = Arc::clone(&state.health);
    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let server = tokio::spawn(run_server(listener, state));
    info!(%addr, %target, "relay ready");

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
        _ = total_loss(&mut status) => {
            Err(anyhow!("all sources lost; stopping relay"))
        }
    };

    if let Err(err) = &outcome {
        health.mark_down(err.to_string());
    }
    shutdown.cancel();
    pipeline.shutdown().await;
    let closed = hub.close_all();
    adapter.shutdown().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(?err, "relay server exited with error"),
        Err(err) => warn!(?err, "relay server task failed"),
    }
    info!(closed, "relay stopped");
    outcome
}

/// Opens the monitored page. A failed navigation is logged; the page may
/// still finish loading and the sources keep running either way.
async fn prepare_page(adapter: &Arc<CdpAdapter>, config: &RelayConfig, target: &Url) -> Result<PageId> {
    let page = adapter
        .create_page("about:blank")
        .await
        .context("failed to open a page")?;
    let viewport = Viewport {
        width: config.page.viewport_width,
        height: config.page.viewport_height,
        ..Viewport::default()
    };
    if let Err(err) = adapter.set_device_metrics(page, viewport).await {
        warn!(%err, "failed to set viewport");
    }
    adapter
        .set_network_tap(page, true)
        .await
        .context("failed to enable network events")?;
    let deadline = Duration::from_millis(config.page.navigate_timeout_ms);
    match adapter.navigate(page, target.as_str(), deadline).await {
        Ok(()) => info!(%target, "navigated"),
        Err(err) => warn!(%target, %err, "navigation failed; monitoring anyway"),
    }
    Ok(page)
}

async fn total_loss(status: &mut watch::Receiver<PipelineReport>) {
    loop {
        if status.borrow().status == PipelineStatus::AllSourcesLost {
            error!("every source is unavailable");
            return;
        }
        if status.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
