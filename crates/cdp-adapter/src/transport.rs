use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// Flags passed to every Chromium launched by the transport.
const CHROME_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-breakpad",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

const HEADLESS_ARGS: &[&str] = &["--headless=new", "--hide-scrollbars", "--mute-audio"];

/// One protocol event as delivered by the browser connection.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;

    /// Release the browser connection. Transports without a browser have nothing to do.
    async fn close(&self) {}
}

/// Transport used when no browser is available; every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        futures::future::pending::<()>().await;
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("no browser attached; cannot run {method}")))
    }
}

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>> + Send + Sync,
>;

/// Transport backed by a Chromium process (launched or attached over its DevTools URL).
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<RuntimeState>>>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { RuntimeState::start(cfg).await.map(Arc::new) })
        });
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn slot(&self) -> &Mutex<Option<Arc<RuntimeState>>> {
        self.state.get_or_init(|| async { Mutex::new(None) }).await
    }

    /// Current runtime, relaunching when the previous one died.
    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        let mut guard = self.slot().await.lock().await;
        if let Some(rt) = guard.as_ref().filter(|rt| rt.is_alive()) {
            return Ok(Arc::clone(rt));
        }
        let runtime = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms.max(1))
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let runtime = self.runtime().await?;
        let deadline = self.deadline();

        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                deadline,
            )
            .await?;
        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setAutoAttach",
                json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                }),
                deadline,
            )
            .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(target, method, params, self.deadline())
            .await
    }

    async fn close(&self) {
        let runtime = self.slot().await.lock().await.take();
        if let Some(runtime) = runtime {
            let grace = self.deadline().min(Duration::from_secs(2));
            if let Err(err) = runtime
                .send_internal(
                    CommandTarget::Browser,
                    "Browser.close",
                    Value::Object(Default::default()),
                    grace,
                )
                .await
            {
                debug!(target: "cdp-transport", %err, "Browser.close did not complete");
            }
            runtime.alive.store(false, Ordering::Relaxed);
        }
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

type Inflight = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => {
                let mut child = launch_browser(browser_config(&cfg)?)?;
                let url = extract_ws_url(&mut child).await.map_err(|err| {
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
                })?;
                (Some(child), url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("connect {ws_url}: {err}"))
                    .retriable(true)
            })?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let loop_alive = Arc::clone(&alive);
        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", %err, "connection loop ended with error");
            }
        });

        let heartbeat_task = spawn_heartbeat(
            command_tx.clone(),
            Arc::clone(&alive),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_task = tokio::spawn(futures::future::pending::<()>());
        (
            Arc::new(Self {
                command_tx,
                events_rx: Mutex::new(events_rx),
                loop_task,
                heartbeat_task: None,
                child: Mutex::new(None),
                alive: Arc::clone(&alive),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (responder, response) = oneshot::channel();
        self.command_tx
            .send(ControlMessage {
                target,
                method: method.to_string(),
                params,
                responder,
            })
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint("connection loop is gone")
                    .retriable(true)
            })?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: response channel closed"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{method} timed out after {}ms", deadline.as_millis()))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let mut inflight = Inflight::new();

        let outcome = loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::submit(&mut conn, cmd, &mut inflight);
                }
                message = conn.next() => match message {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(responder) = inflight.remove(&resp.id) {
                            let _ = responder.send(response_payload(resp));
                        }
                    }
                    Some(Ok(Message::Event(event))) => {
                        if let Some(event) = decode_event(event) {
                            if events_tx.send(event).await.is_err() {
                                break Ok(());
                            }
                        }
                    }
                    Some(Err(err)) => break Err(map_cdp_error(err)),
                    None => break Ok(()),
                }
            }
        };

        let closed = match &outcome {
            Ok(()) => AdapterError::new(AdapterErrorKind::CdpIo).with_hint("cdp connection closed"),
            Err(err) => err.clone(),
        };
        for (_, responder) in inflight.drain() {
            let _ = responder.send(Err(closed.clone()));
        }
        outcome
    }

    fn submit(conn: &mut Connection<CdpEventMessage>, cmd: ControlMessage, inflight: &mut Inflight) {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
        };
        let method: MethodId = cmd.method.into();
        match conn.submit_command(method, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
            }
            Err(err) => {
                let _ = cmd.responder.send(Err(
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
                ));
            }
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        let Ok(mut guard) = self.child.try_lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", %err, "failed to kill chromium");
                        }
                    });
                }
                Err(_) => debug!(target: "cdp-transport", "no runtime to reap chromium child"),
            }
        }
    }
}

fn decode_event(event: CdpEventMessage) -> Option<TransportEvent> {
    let raw: Result<CdpJsonEventMessage, _> = event.try_into();
    match raw {
        Ok(raw) => Some(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        }),
        Err(err) => {
            warn!(target: "cdp-transport", %err, "dropping undecodable cdp event");
            None
        }
    }
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => Ok(Value::Null),
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::Serde(_) => AdapterError::new(AdapterErrorKind::Internal).with_hint(hint),
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn spawn_heartbeat(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    let response_deadline = deadline.min(Duration::from_secs(5));

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; the connection was just proven.
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let (responder, response) = oneshot::channel();
            let probe = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: Value::Object(Default::default()),
                responder,
            };
            if sender.send(probe).await.is_err() {
                break;
            }
            match tokio::time::timeout(response_deadline, response).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", %err, "heartbeat failed");
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }))
}

fn resolve_profile_dir(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    let dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("cannot resolve working directory: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("cannot create profile dir {}: {err}", dir.display()))
    })?;
    Ok(dir)
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    let has_executable = !cfg.executable.as_os_str().is_empty();
    if has_executable && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set ROUNDCAST_CHROME to the full path of chrome/chromium."
            })));
    }

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms))
        .user_data_dir(resolve_profile_dir(cfg)?);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if cfg.disable_sandbox {
        builder = builder.no_sandbox();
    }

    let mut args: Vec<&str> = CHROME_ARGS.to_vec();
    if cfg.headless {
        args.extend_from_slice(HEADLESS_ARGS);
    }
    builder = builder.args(args);

    if has_executable {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

fn launch_browser(config: BrowserConfig) -> Result<Child, AdapterError> {
    config.launch().map_err(|err| {
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("failed to launch chromium: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn relaunches_runtime_after_it_dies() {
        let launches = Arc::new(AtomicUsize::new(0));
        let flags = Arc::new(Mutex::new(Vec::<Arc<AtomicBool>>::new()));

        let factory: RuntimeFactory = {
            let launches = Arc::clone(&launches);
            let flags = Arc::clone(&flags);
            Arc::new(move |_cfg: CdpConfig| {
                let launches = Arc::clone(&launches);
                let flags = Arc::clone(&flags);
                Box::pin(async move {
                    launches.fetch_add(1, Ordering::SeqCst);
                    let (runtime, alive) = RuntimeState::test_stub();
                    flags.lock().await.push(alive);
                    Ok(runtime)
                })
            })
        };
        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.runtime().await.expect("first runtime");
        let again = transport.runtime().await.expect("cached runtime");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(launches.load(Ordering::SeqCst), 1);

        flags.lock().await[0].store(false, Ordering::SeqCst);
        let second = transport.runtime().await.expect("second runtime");
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn close_drops_the_runtime() {
        let factory: RuntimeFactory = Arc::new(|_cfg: CdpConfig| {
            Box::pin(async move { Ok(RuntimeState::test_stub().0) })
        });
        let mut cfg = CdpConfig::default();
        cfg.default_deadline_ms = 20;
        let transport = ChromiumTransport::with_factory(cfg, factory);
        let runtime = transport.runtime().await.expect("runtime");
        transport.close().await;
        assert!(!runtime.is_alive());
        assert!(transport.slot().await.lock().await.is_none());
    }

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let err = NoopTransport
            .send_command(CommandTarget::Browser, "Page.navigate", Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Page.navigate"));
    }

    #[test]
    fn missing_executable_is_reported() {
        let mut cfg = CdpConfig::default();
        cfg.executable = PathBuf::from("/definitely/not/here/chrome");
        let err = browser_config(&cfg).unwrap_err();
        assert!(matches!(err.kind, AdapterErrorKind::CdpIo));
        assert!(err.data.is_some());
    }
}
