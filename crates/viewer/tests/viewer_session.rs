use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roundcast_viewer::{
    AnalysisState, Notice, OperatorCommand, SessionError, TransportState, Viewer,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

async fn next_notice(rx: &mut mpsc::Receiver<Notice>) -> Notice {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("notice within deadline")
        .expect("viewer alive")
}

#[tokio::test]
async fn viewer_records_rounds_and_reports_transport_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    let (go_tx, go_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        ws.send(Message::Text(r#"{"status":"connected","ts":1}"#.into()))
            .await
            .unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) if text == "ping" => {
                    ws.send(Message::Text("pong".into())).await.unwrap();
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {other:?}"),
            }
        }
        go_rx.await.unwrap();
        for record in [
            r#"{"multiplier":3.45,"confidence":0.85,"ts":2,"source":"frame"}"#,
            r#"{"multiplier":6.2,"ts":3,"source":"poll"}"#,
        ] {
            ws.send(Message::Text(record.into())).await.unwrap();
        }
        ws.close(None).await.unwrap();
    });

    let viewer = Viewer::new(Some(Duration::from_millis(50)));
    let mut notices = viewer.notices(64);
    let (commands, command_rx) = mpsc::channel(8);
    let run = tokio::spawn(async move { viewer.run(&endpoint, command_rx).await });

    assert_eq!(
        next_notice(&mut notices).await,
        Notice::Transport(TransportState::Connecting)
    );
    assert_eq!(
        next_notice(&mut notices).await,
        Notice::Transport(TransportState::Connected)
    );

    commands.send(OperatorCommand::Start).await.unwrap();
    assert_eq!(
        next_notice(&mut notices).await,
        Notice::Analysis(AnalysisState::Analyzing)
    );
    commands.send(OperatorCommand::Start).await.unwrap();
    assert!(matches!(next_notice(&mut notices).await, Notice::Warning(_)));
    go_tx.send(()).unwrap();

    let Notice::Round(first) = next_notice(&mut notices).await else {
        panic!("expected a round");
    };
    assert_eq!(first.to_string(), "3.45x  Confidence: 85%");
    let Notice::Round(second) = next_notice(&mut notices).await else {
        panic!("expected a round");
    };
    assert!(second.spike);
    assert!(second.heuristic);
    assert_eq!(second.to_string(), "6.20x  Confidence: 75%");

    assert!(matches!(
        next_notice(&mut notices).await,
        Notice::TransportLost(_)
    ));

    let session = run.await.unwrap().unwrap();
    assert_eq!(session.transport(), TransportState::Disconnected);
    assert_eq!(session.total(), 2);
    let newest: Vec<i64> = session
        .history()
        .entries()
        .map(|e| e.multiplier.hundredths())
        .collect();
    assert_eq!(newest, vec![620, 345]);
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_server_leaves_session_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (_commands, command_rx) = mpsc::channel(1);
    let result = Viewer::new(None).run(&endpoint, command_rx).await;
    assert!(matches!(result, Err(SessionError::ConnectFailed(_))));
}

#[tokio::test]
async fn invalid_endpoint_is_rejected_before_connecting() {
    let (_commands, command_rx) = mpsc::channel(1);
    let result = Viewer::new(None).run("http://localhost:8080", command_rx).await;
    assert!(matches!(result, Err(SessionError::InvalidEndpoint(_))));
}
