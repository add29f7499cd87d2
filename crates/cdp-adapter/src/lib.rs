//! Chromium DevTools Protocol adapter.
//!
//! Owns the browser connection, tracks page targets and their sessions, and
//! republishes the protocol traffic the relay cares about as [`RawEvent`]s:
//! page lifecycle, navigation and the WebSocket frames each page receives.
//! Page-side reads go through [`Cdp`].

use std::{env, path::PathBuf};
use tokio::sync::broadcast;
use which::which;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the browser instance managed by the adapter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Adapter-side session handle for a page.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl std::fmt::Display for PageId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("navigation failed")]
        NavFailed,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("page not attached")]
        PageNotAttached,
        #[error("page script failed")]
        ScriptFailed,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to callers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Events published by the adapter on its broadcast bus.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        PageLifecycle {
            page: PageId,
            phase: String,
            ts: u64,
        },
        PageNavigated {
            page: PageId,
            url: String,
            ts: u64,
        },
        WebSocketCreated {
            page: PageId,
            request_id: String,
            url: String,
            ts: u64,
        },
        /// One frame received by the page. `payload` is the protocol's
        /// `payloadData`: plain text for opcode 1, base64 for opcode 2.
        WebSocketFrame {
            page: PageId,
            request_id: String,
            opcode: u8,
            payload: String,
            ts: u64,
        },
        WebSocketClosed {
            page: PageId,
            request_id: String,
            ts: u64,
        },
        FrameSummary {
            page: PageId,
            open_sockets: u64,
            frames: u64,
            bytes: u64,
            stale: bool,
            since_last_frame_ms: Option<u64>,
        },
        /// The browser connection dropped and every page was reset.
        TransportReset {
            message: String,
        },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }

    impl RawEvent {
        pub fn page(&self) -> Option<PageId> {
            match self {
                RawEvent::PageLifecycle { page, .. }
                | RawEvent::PageNavigated { page, .. }
                | RawEvent::WebSocketCreated { page, .. }
                | RawEvent::WebSocketFrame { page, .. }
                | RawEvent::WebSocketClosed { page, .. }
                | RawEvent::FrameSummary { page, .. } => Some(*page),
                RawEvent::Error { page, .. } => *page,
                RawEvent::TransportReset { .. } => None,
            }
        }
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
    };

    /// Configuration for launching and tuning the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        pub disable_sandbox: bool,
        pub default_deadline_ms: u64,
        pub launch_timeout_ms: u64,
        pub retry_backoff_ms: u64,
        /// Attach to an already running browser instead of launching one.
        pub websocket_url: Option<String>,
        pub heartbeat_interval_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: detect_chrome_executable().unwrap_or_default(),
                user_data_dir: default_profile_dir(),
                headless: env_flag("ROUNDCAST_HEADLESS").unwrap_or(true),
                disable_sandbox: env_flag("ROUNDCAST_DISABLE_SANDBOX").unwrap_or(false),
                default_deadline_ms: 30_000,
                launch_timeout_ms: 20_000,
                retry_backoff_ms: 100,
                websocket_url: None,
                heartbeat_interval_ms: 15_000,
            }
        }
    }

    /// Boolean environment switch; `None` when unset or unrecognised.
    pub(crate) fn env_flag(key: &str) -> Option<bool> {
        let value = env::var(key).ok()?;
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("ROUNDCAST_CHROME_PROFILE") {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        Path::new("./.roundcast-profile").into()
    }
}

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("ROUNDCAST_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    if let Some(path) = chrome_executable_names()
        .iter()
        .find_map(|name| which(name).ok())
    {
        return Some(path);
    }

    let skip_defaults = env::var("ROUNDCAST_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if skip_defaults {
        return None;
    }
    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .filter(|value| !value.trim().is_empty())
            .flat_map(|root| {
                let root = PathBuf::from(root.trim());
                [
                    root.join("Google/Chrome/Application/chrome.exe"),
                    root.join("Chromium/Application/chrome.exe"),
                ]
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

/// Whether the adapter drives a real browser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterMode {
    Real,
    Stub,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterMode::Real => "real",
            AdapterMode::Stub => "stub",
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, AdapterMode::Stub)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChromeMode {
    Auto,
    ForceReal,
    ForceStub,
}

fn chrome_mode() -> ChromeMode {
    match config::env_flag("ROUNDCAST_USE_REAL_CHROME") {
        Some(true) => ChromeMode::ForceReal,
        Some(false) => ChromeMode::ForceStub,
        None => ChromeMode::Auto,
    }
}

fn resolve_chrome_path(cfg: &CdpConfig) -> Option<PathBuf> {
    if !cfg.executable.as_os_str().is_empty() && cfg.executable.exists() {
        return Some(cfg.executable.clone());
    }
    detect_chrome_executable()
}

#[cfg(test)]
mod tests {
    use super::{chrome_executable_names, detect_chrome_executable};
    use serial_test::serial;
    use std::{env, fs};
    use tempfile::tempdir;

    fn restore(key: &str, value: Option<String>) {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    #[test]
    #[serial(chrome_env)]
    fn detects_from_env_var() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("ROUNDCAST_CHROME").ok();
        env::set_var("ROUNDCAST_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        restore("ROUNDCAST_CHROME", original);
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    #[serial(chrome_env)]
    fn detects_from_path_entries() {
        let dir = tempdir().unwrap();
        let name = chrome_executable_names()[0];
        let exe_path = dir.path().join(name);
        fs::write(&exe_path, b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&exe_path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let original_path = env::var("PATH").ok();
        let original_env = env::var("ROUNDCAST_CHROME").ok();
        let skip_flag = env::var("ROUNDCAST_SKIP_OS_PATHS").ok();
        env::set_var("ROUNDCAST_CHROME", "");
        env::set_var("ROUNDCAST_SKIP_OS_PATHS", "1");
        env::set_var("PATH", dir.path());
        let detected = detect_chrome_executable();
        restore("PATH", original_path);
        restore("ROUNDCAST_CHROME", original_env);
        restore("ROUNDCAST_SKIP_OS_PATHS", skip_flag);
        assert_eq!(detected, Some(exe_path));
    }
}

pub mod adapter {
    use super::commands::{ContentQuery, ContentSnapshot, Viewport};
    use super::config::CdpConfig;
    use super::error::{AdapterError, AdapterErrorKind};
    use super::events::RawEvent;
    use super::ids::{BrowserId, PageId, SessionId};
    use super::metrics;
    use super::registry::PageRegistry;
    use super::transport::{
        CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent,
    };
    use super::{chrome_mode, resolve_chrome_path, AdapterMode, ChromeMode};
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use dashmap::DashMap;
    use network_tap_light::{
        config::TapConfig, FrameSnapshot, FrameSummary, MaintenanceHandle, NetworkTapLight,
        PageId as TapPageId, TapError, TapEvent,
    };
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
    use tokio::sync::broadcast;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;
    use tokio::{select, spawn};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    /// Broadcast sender carrying adapter events.
    pub type EventBus = broadcast::Sender<RawEvent>;

    /// Page capabilities the relay needs from a browser.
    #[async_trait]
    pub trait Cdp {
        async fn navigate(&self, page: PageId, url: &str, deadline: Duration)
            -> Result<(), AdapterError>;
        async fn evaluate_script(&self, page: PageId, expression: &str)
            -> Result<Value, AdapterError>;
        async fn query_content(
            &self,
            page: PageId,
            query: &ContentQuery,
        ) -> Result<ContentSnapshot, AdapterError>;
        async fn set_device_metrics(&self, page: PageId, viewport: Viewport)
            -> Result<(), AdapterError>;
        async fn set_network_tap(&self, page: PageId, enabled: bool) -> Result<(), AdapterError>;
    }

    /// Adapter implementation with pluggable transport.
    pub struct CdpAdapter {
        pub browser_id: BrowserId,
        pub cfg: CdpConfig,
        pub bus: EventBus,
        pub registry: Arc<PageRegistry>,
        mode: AdapterMode,
        shutdown: CancellationToken,
        tasks: Mutex<Vec<JoinHandle<()>>>,
        transport: Arc<dyn CdpTransport>,
        targets: DashMap<String, PageId>,
        sessions: DashMap<String, PageId>,
        sockets: DashMap<String, PageId>,
        frame_tap: Arc<NetworkTapLight>,
        tap_maintenance: Mutex<Option<MaintenanceHandle>>,
    }

    impl CdpAdapter {
        /// Picks the Chromium transport when a browser is reachable, else a stub.
        pub fn new(mut cfg: CdpConfig, bus: EventBus) -> Result<Self, AdapterError> {
            let chrome = chrome_mode();
            let detected = resolve_chrome_path(&cfg);
            let use_real = match chrome {
                ChromeMode::ForceStub => false,
                ChromeMode::ForceReal => true,
                ChromeMode::Auto => cfg.websocket_url.is_some() || detected.is_some(),
            };

            if use_real && cfg.websocket_url.is_none() {
                match detected {
                    Some(path) => cfg.executable = path,
                    None => {
                        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint("chrome executable not found")
                            .with_data(json!({
                                "hint": "Install Chrome/Chromium or set ROUNDCAST_CHROME"
                            })));
                    }
                }
            }

            if use_real {
                info!(target: "cdp-adapter", "using Chromium transport");
                let transport = Arc::new(ChromiumTransport::new(cfg.clone()));
                Ok(Self::with_transport(cfg, bus, transport))
            } else {
                warn!(
                    target: "cdp-adapter",
                    mode = %AdapterMode::Stub.as_str(),
                    remediation = "Install Chrome/Chromium and set ROUNDCAST_CHROME=/path/to/chrome or pass --ws-url",
                    "CDP adapter initialized without a browser; page sources will stay unavailable"
                );
                let mut adapter =
                    Self::with_transport(cfg, bus, Arc::new(NoopTransport::default()));
                adapter.mode = AdapterMode::Stub;
                Ok(adapter)
            }
        }

        pub fn with_transport(
            cfg: CdpConfig,
            bus: EventBus,
            transport: Arc<dyn CdpTransport>,
        ) -> Self {
            let (frame_tap, _) = NetworkTapLight::with_config(TapConfig::default(), 256);
            Self {
                browser_id: BrowserId::new(),
                cfg,
                bus,
                registry: Arc::new(PageRegistry::new()),
                mode: AdapterMode::Real,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                transport,
                targets: DashMap::new(),
                sessions: DashMap::new(),
                sockets: DashMap::new(),
                frame_tap: Arc::new(frame_tap),
                tap_maintenance: Mutex::new(None),
            }
        }

        pub fn mode(&self) -> AdapterMode {
            self.mode
        }

        pub fn cancel_token(&self) -> CancellationToken {
            self.shutdown.clone()
        }

        pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
            self.bus.subscribe()
        }

        /// Starts the transport and the event loop. Calling it twice is a no-op.
        pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
            if !self.tasks.lock().await.is_empty() {
                return Ok(());
            }

            {
                let mut maintenance = self.tap_maintenance.lock().await;
                if maintenance.is_none() {
                    *maintenance = Some(self.frame_tap.spawn_maintenance());
                }
            }
            self.transport.start().await?;
            let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
            let forward_task = self.spawn_tap_forwarder();
            let mut guard = self.tasks.lock().await;
            guard.push(loop_task);
            guard.push(forward_task);
            info!(target: "cdp-adapter", mode = self.mode.as_str(), "event loop started");
            Ok(())
        }

        /// Stops background tasks and releases the browser.
        pub async fn shutdown(&self) {
            self.shutdown.cancel();
            let mut handles = self.tasks.lock().await;
            while let Some(handle) = handles.pop() {
                let _ = handle.await;
            }
            drop(handles);
            if let Some(handle) = self.tap_maintenance.lock().await.take() {
                let _ = handle.shutdown().await;
            }
            self.transport.close().await;
            info!(target: "cdp-adapter", "adapter shut down");
        }

        pub fn register_page(
            &self,
            page: PageId,
            session: SessionId,
            target_id: Option<String>,
            cdp_session: Option<String>,
        ) {
            if let Some(target) = target_id.clone() {
                self.targets.insert(target, page);
            }
            if let Some(cdp) = cdp_session.clone() {
                self.sessions.insert(cdp, page);
            }
            self.registry
                .insert_page(page, session, target_id, cdp_session);
            self.frame_tap.enable(Self::tap_page_id(page));
        }

        /// Opens a new tab and waits until its session is attached.
        pub async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
            let response = self
                .send_command("Target.createTarget", json!({ "url": url }))
                .await?;
            let target_id = response
                .get("targetId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint("createTarget missing targetId")
                })?
                .to_string();

            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Some(page) = self.targets.get(&target_id).map(|entry| *entry.value()) {
                    if self.registry.is_attached(&page) {
                        return Ok(page);
                    }
                }
                if Instant::now() >= deadline {
                    return Err(AdapterError::new(AdapterErrorKind::PageNotAttached)
                        .with_hint(format!("target {target_id} never attached")));
                }
                sleep(Duration::from_millis(50)).await;
            }
        }

        pub fn frame_tap(&self) -> Arc<NetworkTapLight> {
            Arc::clone(&self.frame_tap)
        }

        pub async fn frame_snapshot(&self, page: PageId) -> Option<FrameSnapshot> {
            self.frame_tap
                .current_snapshot(Self::tap_page_id(page))
                .await
        }

        fn tap_page_id(page: PageId) -> TapPageId {
            TapPageId(page.0)
        }

        async fn tap_ingest(&self, page: PageId, event: TapEvent) {
            let tap_page = Self::tap_page_id(page);
            if let Err(TapError::PageNotEnabled) = self.frame_tap.ingest(tap_page, event.clone()).await
            {
                self.frame_tap.enable(tap_page);
                if let Err(err) = self.frame_tap.ingest(tap_page, event).await {
                    warn!(target: "cdp-adapter", %err, "frame tap ingest failed");
                }
            }
        }

        fn spawn_tap_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
            let adapter = Arc::clone(self);
            spawn(async move {
                let mut rx = adapter.frame_tap.bus.subscribe();
                loop {
                    select! {
                        _ = adapter.shutdown.cancelled() => break,
                        summary = rx.recv() => match summary {
                            Ok(summary) => adapter.emit_tap_summary(&summary),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            })
        }

        async fn event_loop(self: Arc<Self>) {
            debug!(target: "cdp-adapter", "event loop entered");
            let min_backoff = Duration::from_millis(self.cfg.retry_backoff_ms.max(1));
            const MAX_BACKOFF: Duration = Duration::from_secs(5);
            let mut backoff = min_backoff;

            loop {
                select! {
                    _ = self.shutdown.cancelled() => break,
                    event = self.transport.next_event() => match event {
                        Some(ev) => {
                            backoff = min_backoff;
                            self.handle_event(ev).await;
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_transport_disconnect();
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-adapter", %err, "transport restart failed");
                            }
                            select! {
                                _ = self.shutdown.cancelled() => break,
                                _ = sleep(backoff) => {}
                            }
                            backoff = (backoff + min_backoff).min(MAX_BACKOFF);
                        }
                    }
                }
            }
            debug!(target: "cdp-adapter", "event loop exiting");
        }

        fn handle_transport_disconnect(&self) {
            let pages = self.registry.clear();
            let had_pages = !pages.is_empty();
            for page in pages {
                let _ = self.frame_tap.disable(Self::tap_page_id(page));
                self.emit_page_event(page, "closed");
            }
            self.targets.clear();
            self.sessions.clear();
            self.sockets.clear();

            let message = if had_pages {
                "cdp transport restarted; active pages were reset"
            } else {
                "cdp transport restarted"
            };
            let _ = self.bus.send(RawEvent::TransportReset {
                message: message.to_string(),
            });
        }

        async fn handle_event(&self, event: TransportEvent) {
            let method = event.method.clone();
            if let Err(err) = self.process_event(event).await {
                debug!(target: "cdp-adapter", %method, %err, "cdp event handling failed");
                let _ = self.bus.send(RawEvent::Error {
                    page: None,
                    message: format!("{method}: {err}"),
                });
            }
        }

        async fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
            metrics::record_event();
            match event.method.as_str() {
                "Target.targetCreated" => self.on_target_created(event.params),
                "Target.targetDestroyed" => self.on_target_destroyed(event.params),
                "Target.attachedToTarget" => self.on_target_attached(event.params),
                "Target.detachedFromTarget" => self.on_target_detached(event.params),
                "Target.targetInfoChanged" => self.on_target_info_changed(event.params),
                "Network.webSocketCreated" => self.on_websocket_created(event).await,
                "Network.webSocketFrameReceived" => self.on_websocket_frame(event).await,
                "Network.webSocketClosed" => self.on_websocket_closed(event).await,
                "Runtime.exceptionThrown" => self.on_exception_thrown(event),
                _ => {
                    debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
                    Ok(())
                }
            }
        }

        fn on_target_created(&self, params: Value) -> Result<(), AdapterError> {
            let payload: TargetCreatedParams = decode(params)?;
            if payload.target_info.target_type != "page" {
                return Ok(());
            }

            let target_id = payload.target_info.target_id;
            let page = PageId::new();
            self.targets.insert(target_id.clone(), page);
            self.registry
                .insert_page(page, SessionId::new(), Some(target_id), None);
            self.frame_tap.enable(Self::tap_page_id(page));
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(&page, url);
            }
            self.emit_page_event(page, "opened");
            Ok(())
        }

        fn on_target_destroyed(&self, params: Value) -> Result<(), AdapterError> {
            let payload: TargetDestroyedParams = decode(params)?;
            if let Some((_, page)) = self.targets.remove(&payload.target_id) {
                self.sessions.retain(|_, v| *v != page);
                self.sockets.retain(|_, v| *v != page);
                self.registry.remove_page(&page);
                let _ = self.frame_tap.disable(Self::tap_page_id(page));
                self.emit_page_event(page, "closed");
            }
            Ok(())
        }

        fn on_target_attached(&self, params: Value) -> Result<(), AdapterError> {
            let payload: AttachedToTargetParams = decode(params)?;
            if payload.target_info.target_type != "page" {
                return Ok(());
            }
            if let Some(page) = self
                .targets
                .get(&payload.target_info.target_id)
                .map(|entry| *entry.value())
            {
                self.sessions.insert(payload.session_id.clone(), page);
                self.registry.set_cdp_session(&page, payload.session_id);
                self.emit_page_event(page, "attached");
            }
            Ok(())
        }

        fn on_target_detached(&self, params: Value) -> Result<(), AdapterError> {
            let payload: DetachedFromTargetParams = decode(params)?;
            self.sessions.remove(&payload.session_id);
            Ok(())
        }

        fn on_target_info_changed(&self, params: Value) -> Result<(), AdapterError> {
            let payload: TargetInfoChangedParams = decode(params)?;
            let page = self
                .targets
                .get(&payload.target_info.target_id)
                .map(|entry| *entry.value());
            if let (Some(page), Some(url)) = (
                page,
                payload.target_info.url.filter(|url| !url.is_empty()),
            ) {
                self.registry.set_recent_url(&page, url.clone());
                let _ = self.bus.send(RawEvent::PageNavigated {
                    page,
                    url,
                    ts: timestamp_now(),
                });
            }
            Ok(())
        }

        async fn on_websocket_created(&self, event: TransportEvent) -> Result<(), AdapterError> {
            let payload: WebSocketCreatedParams = decode(event.params)?;
            let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
                return Ok(());
            };
            self.sockets.insert(payload.request_id.clone(), page);
            self.tap_ingest(
                page,
                TapEvent::SocketCreated {
                    request_id: payload.request_id.clone(),
                    url: payload.url.clone(),
                },
            )
            .await;
            debug!(target: "cdp-adapter", %page, url = %payload.url, "websocket created");
            let _ = self.bus.send(RawEvent::WebSocketCreated {
                page,
                request_id: payload.request_id,
                url: payload.url,
                ts: timestamp_now(),
            });
            Ok(())
        }

        async fn on_websocket_frame(&self, event: TransportEvent) -> Result<(), AdapterError> {
            let payload: WebSocketFrameParams = decode(event.params)?;
            let page = self
                .sockets
                .get(&payload.request_id)
                .map(|entry| *entry.value())
                .or_else(|| self.page_from_session(event.session_id.as_ref()));
            let Some(page) = page else {
                return Ok(());
            };

            let opcode = payload.response.opcode.round() as u8;
            metrics::record_websocket_frame(opcode);
            let bytes = frame_len(opcode, &payload.response.payload_data);
            self.tap_ingest(
                page,
                TapEvent::FrameReceived {
                    request_id: payload.request_id.clone(),
                    bytes,
                },
            )
            .await;

            let _ = self.bus.send(RawEvent::WebSocketFrame {
                page,
                request_id: payload.request_id,
                opcode,
                payload: payload.response.payload_data,
                ts: timestamp_now(),
            });
            Ok(())
        }

        async fn on_websocket_closed(&self, event: TransportEvent) -> Result<(), AdapterError> {
            let payload: WebSocketClosedParams = decode(event.params)?;
            let page = self
                .sockets
                .remove(&payload.request_id)
                .map(|(_, page)| page)
                .or_else(|| self.page_from_session(event.session_id.as_ref()));
            let Some(page) = page else {
                return Ok(());
            };
            self.tap_ingest(
                page,
                TapEvent::SocketClosed {
                    request_id: payload.request_id.clone(),
                },
            )
            .await;
            debug!(target: "cdp-adapter", %page, request_id = %payload.request_id, "websocket closed");
            let _ = self.bus.send(RawEvent::WebSocketClosed {
                page,
                request_id: payload.request_id,
                ts: timestamp_now(),
            });
            Ok(())
        }

        fn on_exception_thrown(&self, event: TransportEvent) -> Result<(), AdapterError> {
            let payload: ExceptionThrownParams = decode(event.params)?;
            let message = payload
                .exception_details
                .exception
                .and_then(|ex| ex.description)
                .or(payload.exception_details.text)
                .unwrap_or_else(|| "runtime exception".to_string());
            let page = self.page_from_session(event.session_id.as_ref());
            let _ = self.bus.send(RawEvent::Error { page, message });
            Ok(())
        }

        fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
            session.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
        }

        fn emit_page_event(&self, page: PageId, phase: &str) {
            let _ = self.bus.send(RawEvent::PageLifecycle {
                page,
                phase: phase.to_string(),
                ts: timestamp_now(),
            });
        }

        fn emit_tap_summary(&self, summary: &FrameSummary) {
            metrics::record_frame_summary();
            let _ = self.bus.send(RawEvent::FrameSummary {
                page: PageId(summary.page.0),
                open_sockets: summary.open_sockets,
                frames: summary.frames,
                bytes: summary.bytes,
                stale: summary.stale,
                since_last_frame_ms: summary.since_last_frame_ms,
            });
        }

        async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
            self.send_to(CommandTarget::Browser, method, params).await
        }

        async fn send_page_command(
            &self,
            page: PageId,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            let session = self.registry.cdp_session(&page).ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::PageNotAttached)
                    .with_hint(format!("missing cdp session for page {page}"))
            })?;
            self.send_to(CommandTarget::Session(session), method, params)
                .await
        }

        async fn send_to(
            &self,
            target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            let start = Instant::now();
            metrics::record_command(method);
            match self.transport.send_command(target, method, params).await {
                Ok(value) => {
                    metrics::record_command_success(method, start.elapsed());
                    Ok(value)
                }
                Err(err) => {
                    metrics::record_command_failure(method);
                    Err(err)
                }
            }
        }

        async fn wait_for_dom_ready(&self, page: PageId) -> Result<(), AdapterError> {
            loop {
                let state = self.evaluate_script(page, "document.readyState").await?;
                if matches!(state.as_str(), Some("interactive" | "complete")) {
                    return Ok(());
                }
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    #[async_trait]
    impl Cdp for CdpAdapter {
        async fn navigate(
            &self,
            page: PageId,
            url: &str,
            deadline: Duration,
        ) -> Result<(), AdapterError> {
            let navigation = async {
                let response = self
                    .send_page_command(page, "Page.navigate", json!({ "url": url }))
                    .await?;
                if let Some(error_text) = response
                    .get("errorText")
                    .and_then(|v| v.as_str())
                    .filter(|text| !text.is_empty())
                {
                    return Err(AdapterError::new(AdapterErrorKind::NavFailed)
                        .with_hint(format!("{url}: {error_text}")));
                }
                self.registry.set_recent_url(&page, url.to_string());
                self.wait_for_dom_ready(page).await
            };

            tokio::time::timeout(deadline, navigation)
                .await
                .map_err(|_| {
                    AdapterError::new(AdapterErrorKind::NavTimeout)
                        .with_hint(format!("{url} not ready after {}ms", deadline.as_millis()))
                        .retriable(true)
                })?
        }

        async fn evaluate_script(
            &self,
            page: PageId,
            expression: &str,
        ) -> Result<Value, AdapterError> {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": expression,
                        "awaitPromise": true,
                        "returnByValue": true,
                    }),
                )
                .await?;

            if let Some(details) = response.get("exceptionDetails") {
                return Err(AdapterError::new(AdapterErrorKind::ScriptFailed)
                    .with_hint("page script raised an exception")
                    .with_data(details.clone()));
            }

            Ok(response
                .get("result")
                .and_then(|res| res.get("value"))
                .cloned()
                .unwrap_or(Value::Null))
        }

        async fn query_content(
            &self,
            page: PageId,
            query: &ContentQuery,
        ) -> Result<ContentSnapshot, AdapterError> {
            let value = self.evaluate_script(page, &query.to_expression()?).await?;
            if value.is_null() {
                return Ok(ContentSnapshot::default());
            }
            serde_json::from_value(value).map_err(|err| {
                AdapterError::new(AdapterErrorKind::ScriptFailed)
                    .with_hint(format!("unexpected content payload: {err}"))
            })
        }

        async fn set_device_metrics(
            &self,
            page: PageId,
            viewport: Viewport,
        ) -> Result<(), AdapterError> {
            self.send_page_command(
                page,
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": viewport.device_scale_factor,
                    "mobile": viewport.mobile,
                }),
            )
            .await?;
            Ok(())
        }

        async fn set_network_tap(&self, page: PageId, enabled: bool) -> Result<(), AdapterError> {
            let tap_page = Self::tap_page_id(page);
            if enabled {
                self.send_page_command(
                    page,
                    "Network.enable",
                    json!({
                        "maxTotalBufferSize": 1_048_576u64,
                        "maxResourceBufferSize": 524_288u64,
                    }),
                )
                .await?;
                self.frame_tap.enable(tap_page);
            } else {
                self.send_page_command(page, "Network.disable", Value::Object(Default::default()))
                    .await?;
                let _ = self.frame_tap.disable(tap_page);
            }
            Ok(())
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, AdapterError> {
        serde_json::from_value(params)
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
    }

    /// Wire size of a frame payload; binary payloads arrive base64 encoded.
    fn frame_len(opcode: u8, payload: &str) -> u64 {
        if opcode == 2 {
            if let Ok(bytes) = STANDARD.decode(payload) {
                return bytes.len() as u64;
            }
        }
        payload.len() as u64
    }

    fn timestamp_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    #[derive(Debug, Deserialize)]
    struct TargetCreatedParams {
        #[serde(rename = "targetInfo")]
        target_info: TargetInfoPayload,
    }

    #[derive(Debug, Deserialize)]
    struct TargetDestroyedParams {
        #[serde(rename = "targetId")]
        target_id: String,
    }

    #[derive(Debug, Deserialize)]
    struct AttachedToTargetParams {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "targetInfo")]
        target_info: TargetInfoPayload,
    }

    #[derive(Debug, Deserialize)]
    struct DetachedFromTargetParams {
        #[serde(rename = "sessionId")]
        session_id: String,
    }

    #[derive(Debug, Deserialize)]
    struct TargetInfoChangedParams {
        #[serde(rename = "targetInfo")]
        target_info: TargetInfoPayload,
    }

    #[derive(Debug, Deserialize)]
    struct TargetInfoPayload {
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(rename = "type")]
        target_type: String,
        url: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct WebSocketCreatedParams {
        #[serde(rename = "requestId")]
        request_id: String,
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct WebSocketFrameParams {
        #[serde(rename = "requestId")]
        request_id: String,
        response: WebSocketFramePayload,
    }

    #[derive(Debug, Deserialize)]
    struct WebSocketFramePayload {
        opcode: f64,
        #[serde(rename = "payloadData")]
        payload_data: String,
    }

    #[derive(Debug, Deserialize)]
    struct WebSocketClosedParams {
        #[serde(rename = "requestId")]
        request_id: String,
    }

    #[derive(Debug, Deserialize)]
    struct ExceptionThrownParams {
        #[serde(rename = "exceptionDetails")]
        exception_details: ExceptionDetails,
    }

    #[derive(Debug, Deserialize)]
    struct ExceptionDetails {
        text: Option<String>,
        exception: Option<ExceptionObject>,
    }

    #[derive(Debug, Deserialize)]
    struct ExceptionObject {
        description: Option<String>,
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serial_test::serial;
        use std::collections::VecDeque;
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use tokio::sync::mpsc;
        use tokio::time::{timeout, Duration as TokioDuration};

        struct MockTransport {
            started: AtomicBool,
            rx: Mutex<mpsc::Receiver<TransportEvent>>,
            commands: Mutex<Vec<(String, Value)>>,
            responses: Mutex<VecDeque<Value>>,
        }

        impl MockTransport {
            fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
                let (tx, rx) = mpsc::channel(16);
                (
                    Arc::new(Self {
                        started: AtomicBool::new(false),
                        rx: Mutex::new(rx),
                        commands: Mutex::new(Vec::new()),
                        responses: Mutex::new(VecDeque::new()),
                    }),
                    tx,
                )
            }

            fn started(&self) -> bool {
                self.started.load(Ordering::SeqCst)
            }

            async fn commands(&self) -> Vec<(String, Value)> {
                self.commands.lock().await.clone()
            }

            async fn set_response(&self, value: Value) {
                self.responses.lock().await.push_back(value);
            }
        }

        #[async_trait]
        impl CdpTransport for MockTransport {
            async fn start(&self) -> Result<(), AdapterError> {
                self.started.store(true, Ordering::SeqCst);
                Ok(())
            }

            async fn next_event(&self) -> Option<TransportEvent> {
                self.rx.lock().await.recv().await
            }

            async fn send_command(
                &self,
                _target: CommandTarget,
                method: &str,
                params: Value,
            ) -> Result<Value, AdapterError> {
                self.commands
                    .lock()
                    .await
                    .push((method.to_string(), params));
                Ok(self
                    .responses
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or(Value::Null))
            }
        }

        struct DisconnectingTransport {
            start_calls: AtomicUsize,
            next_calls: AtomicUsize,
            rx: Mutex<mpsc::Receiver<TransportEvent>>,
        }

        impl DisconnectingTransport {
            fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
                let (tx, rx) = mpsc::channel(16);
                (
                    Arc::new(Self {
                        start_calls: AtomicUsize::new(0),
                        next_calls: AtomicUsize::new(0),
                        rx: Mutex::new(rx),
                    }),
                    tx,
                )
            }

            fn start_calls(&self) -> usize {
                self.start_calls.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl CdpTransport for DisconnectingTransport {
            async fn start(&self) -> Result<(), AdapterError> {
                self.start_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn next_event(&self) -> Option<TransportEvent> {
                if self.next_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return None;
                }
                self.rx.lock().await.recv().await
            }

            async fn send_command(
                &self,
                _target: CommandTarget,
                _method: &str,
                _params: Value,
            ) -> Result<Value, AdapterError> {
                Ok(Value::Null)
            }
        }

        fn adapter_with(transport: Arc<dyn CdpTransport>) -> (Arc<CdpAdapter>, broadcast::Receiver<RawEvent>) {
            let (bus, rx) = crate::event_bus(32);
            (
                Arc::new(CdpAdapter::with_transport(CdpConfig::default(), bus, transport)),
                rx,
            )
        }

        fn attached_page(adapter: &CdpAdapter, cdp_session: &str) -> PageId {
            let page = PageId::new();
            adapter.register_page(
                page,
                SessionId::new(),
                Some(format!("target-{cdp_session}")),
                Some(cdp_session.to_string()),
            );
            page
        }

        async fn next_matching<F>(rx: &mut broadcast::Receiver<RawEvent>, mut pred: F) -> RawEvent
        where
            F: FnMut(&RawEvent) -> bool,
        {
            timeout(TokioDuration::from_millis(500), async {
                loop {
                    if let Ok(event) = rx.recv().await {
                        if pred(&event) {
                            return event;
                        }
                    }
                }
            })
            .await
            .expect("matching raw event")
        }

        #[tokio::test]
        async fn ignores_unknown_events() {
            let (transport, tx) = MockTransport::new_pair();
            let (adapter, mut rx) = adapter_with(transport.clone());
            Arc::clone(&adapter).start().await.expect("start adapter");
            assert!(transport.started());

            tx.send(TransportEvent {
                method: "Test.Event".into(),
                params: Value::Null,
                session_id: None,
            })
            .await
            .unwrap();

            let result = timeout(TokioDuration::from_millis(100), rx.recv()).await;
            assert!(result.is_err(), "unexpected raw event broadcast: {result:?}");
            adapter.shutdown().await;
        }

        #[tokio::test]
        async fn websocket_frames_are_republished_per_page() {
            let (transport, tx) = MockTransport::new_pair();
            let (adapter, mut rx) = adapter_with(transport.clone());
            Arc::clone(&adapter).start().await.expect("start adapter");
            let page = attached_page(&adapter, "s-frames");

            tx.send(TransportEvent {
                method: "Network.webSocketCreated".into(),
                params: json!({"requestId": "77.1", "url": "wss://game.example/rounds"}),
                session_id: Some("s-frames".into()),
            })
            .await
            .unwrap();
            tx.send(TransportEvent {
                method: "Network.webSocketFrameReceived".into(),
                params: json!({
                    "requestId": "77.1",
                    "timestamp": 12.5,
                    "response": {"opcode": 1, "mask": false, "payloadData": "{\"multiplier\":3.45}"}
                }),
                session_id: Some("s-frames".into()),
            })
            .await
            .unwrap();

            let created = next_matching(&mut rx, |e| matches!(e, RawEvent::WebSocketCreated { .. })).await;
            assert_eq!(created.page(), Some(page));

            match next_matching(&mut rx, |e| matches!(e, RawEvent::WebSocketFrame { .. })).await {
                RawEvent::WebSocketFrame {
                    page: frame_page,
                    opcode,
                    payload,
                    ..
                } => {
                    assert_eq!(frame_page, page);
                    assert_eq!(opcode, 1);
                    assert_eq!(payload, "{\"multiplier\":3.45}");
                }
                other => panic!("unexpected event {other:?}"),
            }

            let snapshot = adapter.frame_snapshot(page).await.expect("tap snapshot");
            assert_eq!(snapshot.frames, 1);
            assert_eq!(snapshot.open_sockets, 1);
            adapter.shutdown().await;
        }

        #[tokio::test]
        async fn frames_from_unknown_sessions_are_dropped() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, mut rx) = adapter_with(transport);
            adapter
                .handle_event(TransportEvent {
                    method: "Network.webSocketFrameReceived".into(),
                    params: json!({
                        "requestId": "1.1",
                        "response": {"opcode": 1, "payloadData": "2.00"}
                    }),
                    session_id: Some("nobody".into()),
                })
                .await;
            assert!(rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn event_loop_recovers_after_transport_disconnect() {
            let (transport, tx) = DisconnectingTransport::new_pair();
            let (adapter, mut rx) = adapter_with(transport.clone());
            let stale_page = attached_page(&adapter, "stale-session");

            Arc::clone(&adapter).start().await.expect("start adapter");
            assert_eq!(transport.start_calls(), 1);

            timeout(TokioDuration::from_millis(500), async {
                while transport.start_calls() < 2 {
                    sleep(TokioDuration::from_millis(10)).await;
                }
            })
            .await
            .expect("transport restart");

            let closed = next_matching(&mut rx, |e| {
                matches!(e, RawEvent::PageLifecycle { phase, .. } if phase == "closed")
            })
            .await;
            assert_eq!(closed.page(), Some(stale_page));
            next_matching(&mut rx, |e| matches!(e, RawEvent::TransportReset { .. })).await;

            tx.send(TransportEvent {
                method: "Target.targetCreated".into(),
                params: json!({
                    "targetInfo": {"targetId": "page-1", "type": "page", "url": "https://example.com"}
                }),
                session_id: None,
            })
            .await
            .unwrap();
            next_matching(&mut rx, |e| {
                matches!(e, RawEvent::PageLifecycle { phase, .. } if phase == "opened")
            })
            .await;

            assert!(adapter.registry.get(&stale_page).is_none());
            assert!(adapter.sessions.get("stale-session").is_none());
            adapter.shutdown().await;
        }

        #[tokio::test]
        #[serial(cdp_metrics)]
        async fn commands_route_through_transport_and_record_metrics() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport.clone());
            let page = attached_page(&adapter, "s-cmd");

            crate::metrics::reset();
            transport.set_response(json!({"frameId": "f1"})).await;
            transport
                .set_response(json!({"result": {"value": "complete"}}))
                .await;
            adapter
                .navigate(page, "https://example.com", Duration::from_secs(5))
                .await
                .expect("navigate through transport");

            adapter
                .set_device_metrics(page, Viewport::default())
                .await
                .expect("viewport");

            let commands = transport.commands().await;
            assert_eq!(commands[0].0, "Page.navigate");
            assert_eq!(commands[1].0, "Runtime.evaluate");
            assert_eq!(commands[2].0, "Emulation.setDeviceMetricsOverride");
            assert_eq!(commands[2].1["width"], 1200);
            assert_eq!(commands[2].1["height"], 800);

            let snapshot = crate::metrics::snapshot();
            assert!(snapshot.commands >= 3);
            assert!(snapshot.command_success >= 3);
            assert_eq!(
                adapter.registry.get(&page).unwrap().recent_url.as_deref(),
                Some("https://example.com")
            );
        }

        #[tokio::test]
        async fn navigate_surfaces_error_text() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport.clone());
            let page = attached_page(&adapter, "s-nav");
            transport
                .set_response(json!({"frameId": "f1", "errorText": "net::ERR_NAME_NOT_RESOLVED"}))
                .await;
            let err = adapter
                .navigate(page, "https://nowhere.invalid", Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err.kind, AdapterErrorKind::NavFailed));
        }

        #[tokio::test]
        async fn query_content_decodes_rule_and_text() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport.clone());
            let page = attached_page(&adapter, "s-query");
            transport
                .set_response(json!({"result": {"value": {"text": "2.37x", "rule": ".crash-value"}}}))
                .await;

            let query = ContentQuery::new(vec![".crash-value".into()], 2000);
            let snapshot = adapter.query_content(page, &query).await.expect("content");
            assert_eq!(snapshot.text, "2.37x");
            assert_eq!(snapshot.rule.as_deref(), Some(".crash-value"));

            let commands = transport.commands().await;
            let expression = commands[0].1["expression"].as_str().unwrap();
            assert!(expression.contains(".crash-value"));
        }

        #[tokio::test]
        async fn script_exceptions_become_errors() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport.clone());
            let page = attached_page(&adapter, "s-exc");
            transport
                .set_response(json!({"exceptionDetails": {"text": "boom"}}))
                .await;
            let err = adapter.evaluate_script(page, "boom()").await.unwrap_err();
            assert!(matches!(err.kind, AdapterErrorKind::ScriptFailed));
        }

        #[tokio::test]
        async fn unattached_page_is_rejected() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport);
            let err = adapter
                .evaluate_script(PageId::new(), "1")
                .await
                .unwrap_err();
            assert!(matches!(err.kind, AdapterErrorKind::PageNotAttached));
        }

        #[tokio::test]
        async fn set_network_tap_toggles_transport_commands() {
            let (transport, _tx) = MockTransport::new_pair();
            let (adapter, _rx) = adapter_with(transport.clone());
            let page = attached_page(&adapter, "s-tap");

            adapter.set_network_tap(page, true).await.expect("enable tap");
            assert!(adapter.frame_snapshot(page).await.is_some());
            adapter.set_network_tap(page, false).await.expect("disable tap");
            assert!(adapter.frame_snapshot(page).await.is_none());

            let methods: Vec<String> = transport
                .commands()
                .await
                .into_iter()
                .map(|(method, _)| method)
                .collect();
            assert_eq!(methods, vec!["Network.enable", "Network.disable"]);
        }

        #[test]
        fn binary_frame_length_uses_decoded_bytes() {
            assert_eq!(frame_len(1, "abcd"), 4);
            assert_eq!(frame_len(2, &STANDARD.encode([0u8; 10])), 10);
            assert_eq!(frame_len(2, "not base64!"), 11);
        }
    }
}

pub mod commands;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod util;

pub use adapter::{Cdp, CdpAdapter, EventBus};
pub use commands::{ContentQuery, ContentSnapshot, Viewport};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use ids::{BrowserId, PageId, SessionId};
pub use metrics::AdapterMetricsSnapshot;
pub use network_tap_light::FrameSnapshot;
pub use transport::{CdpTransport, CommandTarget, NoopTransport, TransportEvent};

/// Creates the broadcast bus the adapter publishes on.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer.max(1))
}

pub type EventStream = broadcast::Receiver<RawEvent>;
