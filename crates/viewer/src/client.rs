//! WebSocket loop driving a [`ClientSession`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roundcast_event_bus::{to_mpsc, EventBus, InMemoryBus};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::command::{OperatorCommand, HELP};
use crate::session::{AnalysisState, ClientSession, SessionError, Transition, TransportState};
use crate::stats::{DisplayStats, HistoryEntry};

/// Everything the viewer wants shown to the operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Transport(TransportState),
    Analysis(AnalysisState),
    Round(HistoryEntry),
    Stats(DisplayStats),
    History(Vec<HistoryEntry>),
    Info(String),
    Warning(String),
    Error(String),
    /// The server went away; there is no automatic reconnect.
    TransportLost(String),
}

pub struct Viewer {
    session: ClientSession,
    notices: Arc<InMemoryBus<Notice>>,
    ping_every: Option<Duration>,
}

impl Viewer {
    pub fn new(ping_every: Option<Duration>) -> Self {
        Self {
            session: ClientSession::new(),
            notices: InMemoryBus::new(128),
            ping_every: ping_every.filter(|every| !every.is_zero()),
        }
    }

    /// Stream of notices published from now on.
    pub fn notices(&self, capacity: usize) -> mpsc::Receiver<Notice> {
        to_mpsc(self.notices.as_ref(), capacity)
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Publishes to whoever is listening, possibly nobody.
    async fn notify(&self, notice: Notice) {
        let _ = self.notices.publish(notice).await;
    }

    /// Connects and runs until the operator quits, the command channel
    /// closes or the connection is lost. Returns the final session.
    pub async fn run(
        mut self,
        endpoint: &str,
        mut commands: mpsc::Receiver<OperatorCommand>,
    ) -> Result<ClientSession, SessionError> {
        let url = self.session.connect(endpoint)?;
        self.notify(Notice::Transport(TransportState::Connecting)).await;

        let (stream, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(err) => {
                self.session.on_transport_lost();
                self.notify(Notice::Transport(TransportState::Disconnected))
                    .await;
                return Err(SessionError::ConnectFailed(err.to_string()));
            }
        };
        self.session.on_connected();
        info!(target: "viewer", %url, "connected");
        self.notify(Notice::Transport(TransportState::Connected)).await;
        let (mut write, mut read) = stream.split();

        let every = self.ping_every.unwrap_or(Duration::from_secs(3600));
        let mut ping = interval_at(Instant::now() + every, every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        let _ = write.send(Message::Close(None)).await;
                        self.session.disconnect();
                        break;
                    };
                    if command == OperatorCommand::Quit {
                        let _ = write.send(Message::Close(None)).await;
                        self.session.disconnect();
                        self.notify(Notice::Transport(TransportState::Disconnected)).await;
                        break;
                    }
                    self.apply(command).await;
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text == "pong" {
                            debug!(target: "viewer", "pong");
                            continue;
                        }
                        if let Some(entry) = self.session.on_message(&text) {
                            self.notify(Notice::Round(entry)).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.lose("server closed the connection".into()).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        self.lose(err.to_string()).await;
                        break;
                    }
                },
                _ = ping.tick(), if self.ping_every.is_some() => {
                    if let Err(err) = write.send(Message::Text("ping".into())).await {
                        self.lose(err.to_string()).await;
                        break;
                    }
                }
            }
        }
        Ok(self.session)
    }

    async fn lose(&mut self, reason: String) {
        warn!(target: "viewer", %reason, "transport lost");
        self.session.on_transport_lost();
        self.notify(Notice::TransportLost(reason)).await;
    }

    async fn apply(&mut self, command: OperatorCommand) {
        let notice = match command {
            OperatorCommand::Start => match self.session.start() {
                Ok(Transition::Changed) => Notice::Analysis(AnalysisState::Analyzing),
                Ok(Transition::Unchanged(warning)) => Notice::Warning(warning.to_string()),
                Err(err) => Notice::Error(err.to_string()),
            },
            OperatorCommand::Stop => match self.session.stop() {
                Transition::Changed => Notice::Analysis(AnalysisState::Idle),
                Transition::Unchanged(warning) => Notice::Warning(warning.to_string()),
            },
            OperatorCommand::Stats => Notice::Stats(self.session.stats()),
            OperatorCommand::History => {
                Notice::History(self.session.history().entries().cloned().collect())
            }
            OperatorCommand::Help => Notice::Info(HELP.to_string()),
            OperatorCommand::Quit => return,
        };
        self.notify(notice).await;
    }
}
