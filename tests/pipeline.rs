use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use plustwo_tracker::prelude::*;

/// Upstream stand-in fed by the test through a shared broadcast sender
struct ChannelConnection {
    receiver: Option<broadcast::Receiver<ChatMessage>>,
}

#[async_trait]
impl PlatformConnection for ChannelConnection {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "test"
    }

    fn take_message_receiver(&mut self) -> Option<broadcast::Receiver<ChatMessage>> {
        self.receiver.take()
    }

    fn get_channels(&self) -> Vec<String> {
        vec!["northernlion".to_string()]
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

fn test_config(dir: &std::path::Path) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.file_sink.path = dir.join("plustwos.log");
    config.live.listen_addr = "127.0.0.1:0".to_string();
    // Windows are closed by hand
    config.window.interval_seconds = 3600;
    config
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[test_log::test(tokio::test)]
async fn chat_to_file_and_viewers() {
    let dir = tempdir().unwrap();
    let tracker = Tracker::new(test_config(dir.path())).unwrap();
    let tracker = &tracker;

    let (chat, _) = broadcast::channel::<ChatMessage>(16);
    let upstream = chat.clone();
    let chat = &chat;
    let factory: ConnectionFactory = Arc::new(move || {
        Box::new(ChannelConnection {
            receiver: Some(upstream.subscribe()),
        }) as Box<dyn PlatformConnection>
    });

    let running = tracker.start(Some(factory)).await.unwrap();
    let addr = running.live_addr().unwrap();

    let (mut first, _) = connect_async(format!("ws://{}/tracker", addr)).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{}/tracker", addr)).await.unwrap();

    // Registered then dropped before the window closes; must see nothing
    let mut observer = tracker.registry().register().await;
    assert!(tracker.registry().deregister(observer.id).await);

    // File sink plus two viewers
    eventually(|| async move { tracker.registry().len().await == 3 }).await;
    eventually(|| async move { chat.receiver_count() > 0 }).await;

    for line in ["great +2 move", "ugh -2", "no match here", "+2"] {
        chat.send(ChatMessage::new("test", "northernlion", "viewer", line)).unwrap();
    }
    eventually(|| async move { tracker.bridge().stats().messages_seen == 4 }).await;

    let (stat, report) = tracker.scheduler().tick().await;
    assert_eq!((stat.positive_count, stat.negative_count), (2, 1));
    assert_eq!(report.delivered, 3);

    let expected = serde_json::json!({
        "Time": stat.timestamp,
        "PlusTwos": 2,
        "MinusTwos": 1,
    });
    for client in [&mut first, &mut second] {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), expected);
    }
    assert!(observer.try_recv().is_none());

    // Nothing counted since; the next window is empty
    let (empty, _) = tracker.scheduler().tick().await;
    assert_eq!((empty.positive_count, empty.negative_count), (0, 0));
    assert!(empty.timestamp > stat.timestamp);

    tracker.shutdown().trigger_shutdown();
    running.wait().await.unwrap();

    let log = tokio::fs::read_to_string(dir.path().join("plustwos.log")).await.unwrap();
    assert_eq!(
        log,
        format!("{},2,1\n{},0,0\n", stat.timestamp, empty.timestamp)
    );
    assert!(tracker.registry().is_empty().await);
}

#[tokio::test]
async fn upstream_loss_without_reconnect_is_fatal() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.live.enabled = false;
    let tracker = Tracker::new(config).unwrap();

    // The sender is dropped right away, so the stream ends immediately
    let factory: ConnectionFactory = Arc::new(|| {
        let (_, receiver) = broadcast::channel(1);
        Box::new(ChannelConnection {
            receiver: Some(receiver),
        }) as Box<dyn PlatformConnection>
    });

    let running = tracker.start(Some(factory)).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running.wait())
        .await
        .unwrap();
    assert!(result.is_err());
    assert!(tracker.shutdown().is_shutdown_requested());
}

#[tokio::test]
async fn scheduler_closes_windows_on_its_own() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.window.interval_seconds = 1;
    config.live.enabled = false;
    let tracker = Tracker::new(config).unwrap();
    let tracker = &tracker;

    let running = tracker.start(None).await.unwrap();
    eventually(|| async move { tracker.registry().len().await == 1 }).await;
    tracker.bridge().ingest("+2");

    tokio::time::timeout(Duration::from_secs(3), async {
        while tracker.scheduler().windows_emitted() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let latest = tracker.scheduler().latest().await.unwrap();
    assert_eq!(latest.positive_count, 1);

    tracker.shutdown().trigger_shutdown();
    running.wait().await.unwrap();

    let log = tokio::fs::read_to_string(dir.path().join("plustwos.log")).await.unwrap();
    assert!(log.starts_with(&format!("{},1,0\n", latest.timestamp)));
}
