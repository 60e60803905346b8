//! Integration tests for the connection supervisor against a loopback
//! WebSocket server.

#![cfg(unix)]

use futures::{SinkExt, StreamExt};
use mcplink::ConnectionSupervisor;
use mcplink_core::BridgeConfig;
use mcplink_transport::ProcessConfig;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn config(endpoint: String) -> BridgeConfig {
    BridgeConfig {
        endpoint,
        reset_backoff: false,
        handler_override: None,
    }
}

/// Full cycle: the supervisor connects, spawns the handler, and the relay
/// echoes a frame back; cancelling the token then exits cleanly.
#[tokio::test]
async fn supervisor_runs_a_cycle_and_exits_on_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(r#"{"jsonrpc":"2.0","id":1}"#))
            .await
            .unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected echoed frame, got {other:?}"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let supervisor = ConnectionSupervisor::new(
        config(endpoint),
        ProcessConfig::new("cat"),
        cancel.clone(),
    );
    let run = tokio::spawn(supervisor.run());

    let echoed = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, r#"{"jsonrpc":"2.0","id":1}"#);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

/// An unreachable endpoint keeps the supervisor in its backoff loop;
/// shutdown during backoff still exits cleanly with `Ok`.
#[tokio::test(start_paused = true)]
async fn supervisor_retries_until_cancelled() {
    // Nothing listens here; connects fail immediately with ECONNREFUSED.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let cancel = CancellationToken::new();
    let supervisor = ConnectionSupervisor::new(
        config(endpoint),
        ProcessConfig::new("cat"),
        cancel.clone(),
    );
    let run = tokio::spawn(supervisor.run());

    // Paused clock: this skips through several escalating backoff sleeps.
    tokio::time::sleep(Duration::from_secs(30)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(60), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

/// A handler that exits immediately ends the cycle; the supervisor tears it
/// down and reconnects after backoff.
#[tokio::test]
async fn handler_eof_triggers_a_new_cycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut connections = 0;
        while connections < 2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            connections += 1;
            // Hold the connection open until the bridge drops it.
            while ws.next().await.is_some() {}
        }
        connections
    });

    let cancel = CancellationToken::new();
    // `true` exits at once: stdout EOF on every cycle.
    let supervisor = ConnectionSupervisor::new(
        config(endpoint),
        ProcessConfig::new("true"),
        cancel.clone(),
    );
    let run = tokio::spawn(supervisor.run());

    let connections = tokio::time::timeout(Duration::from_secs(15), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connections, 2);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
