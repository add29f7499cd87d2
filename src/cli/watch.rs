use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use roundcast_viewer::{
    history_line, AnalysisState, Notice, OperatorCommand, TransportState, Viewer, HELP,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Args, Clone, Debug)]
pub struct WatchArgs {
    /// Relay address, e.g. ws://192.168.0.10:8080 (prompted when omitted)
    pub endpoint: Option<String>,

    /// Seconds between keep-alive pings (0 disables)
    #[arg(long = "ping-secs", default_value_t = 30)]
    pub ping_secs: u64,

    /// Start analysis as soon as the connection is up
    #[arg(long)]
    pub start: bool,
}

pub async fn cmd_watch(args: WatchArgs) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let endpoint = match args.endpoint {
        Some(endpoint) => endpoint,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(b"Relay WebSocket address (e.g. ws://192.168.0.10:8080): ")
                .await?;
            stdout.flush().await?;
            lines
                .next_line()
                .await?
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .context("no relay address given")?
        }
    };

    let viewer = Viewer::new(Some(Duration::from_secs(args.ping_secs)));
    let mut notices = viewer.notices(256);
    let (commands, command_rx) = mpsc::channel(16);

    let auto_start = args.start;
    let renderer = tokio::spawn({
        let commands = commands.clone();
        async move {
            while let Some(notice) = notices.recv().await {
                if auto_start && notice == Notice::Transport(TransportState::Connected) {
                    let _ = commands.send(OperatorCommand::Start).await;
                }
                render(&notice);
            }
        }
    });
    let reader = tokio::spawn(async move {
        println!("{HELP}");
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<OperatorCommand>() {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) => println!("{err}"),
            }
        }
    });

    let result = viewer.run(&endpoint, command_rx).await;
    reader.abort();
    renderer.abort();
    let session = result.with_context(|| format!("viewer for {endpoint} failed"))?;
    println!("{}", session.stats());
    Ok(())
}

fn render(notice: &Notice) {
    match notice {
        Notice::Transport(TransportState::Connecting) => println!("[status] connecting..."),
        Notice::Transport(TransportState::Connected) => println!("[status] connected"),
        Notice::Transport(TransportState::Disconnected) => println!("[status] disconnected"),
        Notice::Analysis(AnalysisState::Analyzing) => println!("[analysis] ANALYZING"),
        Notice::Analysis(AnalysisState::Idle) => println!("[analysis] STOPPED"),
        Notice::Round(entry) => {
            let marker = if entry.spike { "  <spike>" } else { "" };
            println!("{entry}{marker}");
        }
        Notice::Stats(stats) => println!("{stats}"),
        Notice::History(entries) => {
            if entries.is_empty() {
                println!("(no rounds yet)");
            }
            for entry in entries {
                println!("{}", history_line(entry));
            }
        }
        Notice::Info(text) => println!("{text}"),
        Notice::Warning(text) => println!("[warning] {text}"),
        Notice::Error(text) => println!("[error] {text}"),
        Notice::TransportLost(reason) => println!("[status] connection lost: {reason}"),
    }
}
