use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use plustwo_tracker::config::LiveConfig;
use plustwo_tracker::sinks::LiveServer;
use plustwo_tracker::tracker::registry::SubscriberRegistry;
use plustwo_tracker::tracker::shutdown::GracefulShutdown;
use plustwo_tracker::types::WindowStat;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    registry: Arc<SubscriberRegistry>,
    shutdown: GracefulShutdown,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

async fn start_server() -> Harness {
    let registry = Arc::new(SubscriberRegistry::new());
    let config = LiveConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..LiveConfig::default()
    };
    let server = LiveServer::bind(&config, Arc::clone(&registry)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = GracefulShutdown::with_default_config();
    let server = tokio::spawn(server.run(shutdown.listener()));

    Harness { registry, shutdown, addr, server }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/tracker", addr)).await.unwrap();
    client
}

async fn wait_for_subscribers(registry: &SubscriberRegistry, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.len().await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached");
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no frame received")
        .expect("stream ended")
        .expect("websocket error");
    match frame {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn broadcast_reaches_viewer_as_json() {
    let harness = start_server().await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.registry, 1).await;

    let report = harness.registry.broadcast(WindowStat::new(10, 2, 0)).await;
    assert_eq!(report.delivered, 1);

    let frame = next_json(&mut client).await;
    assert_eq!(frame, serde_json::json!({"Time": 10, "PlusTwos": 2, "MinusTwos": 0}));
}

#[tokio::test]
async fn windows_arrive_in_order() {
    let harness = start_server().await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.registry, 1).await;

    harness.registry.broadcast(WindowStat::new(10, 2, 0)).await;
    harness.registry.broadcast(WindowStat::new(20, 0, 1)).await;

    assert_eq!(next_json(&mut client).await["Time"], 10);
    assert_eq!(next_json(&mut client).await["Time"], 20);
}

#[tokio::test]
async fn wrong_path_is_rejected() {
    let harness = start_server().await;

    let result = connect_async(format!("ws://{}/elsewhere", harness.addr)).await;
    match result {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected 404 rejection, got {:?}", other.map(|_| ())),
    }
    assert!(harness.registry.is_empty().await);
}

#[tokio::test]
async fn client_close_deregisters() {
    let harness = start_server().await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.registry, 1).await;

    client.close(None).await.unwrap();
    wait_for_subscribers(&harness.registry, 0).await;

    // Broadcasting afterwards reaches nobody and does not fail
    let report = harness.registry.broadcast(WindowStat::new(30, 1, 1)).await;
    assert_eq!(report.delivered, 0);
}

#[tokio::test]
async fn shutdown_closes_viewer_connections() {
    let harness = start_server().await;
    let mut client = connect(harness.addr).await;
    wait_for_subscribers(&harness.registry, 1).await;

    harness.shutdown.trigger_shutdown();
    tokio::time::timeout(Duration::from_secs(2), harness.server)
        .await
        .unwrap()
        .unwrap();

    // The server sends a close frame, then the stream ends
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_for_subscribers(&harness.registry, 0).await;
}
