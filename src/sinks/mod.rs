// src/sinks/mod.rs - Window consumers fed by the subscriber registry

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::tracker::registry::SubscriberRegistry;
use crate::tracker::shutdown::ShutdownListener;
use crate::types::WindowStat;

pub mod file;
pub mod live;

pub use file::FileSink;
pub use live::{LiveServer, LiveSubscriberSink};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write to {path} failed after {attempts} attempts: {source}")]
    Write {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode window: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Something that consumes closed windows
#[async_trait]
pub trait WindowSink: Send {
    /// Name used in log lines
    fn name(&self) -> String;

    async fn deliver(&mut self, stat: &WindowStat) -> Result<(), SinkError>;

    /// Whether a failed delivery ends this sink (a dead connection) or is skipped
    fn ends_on_error(&self) -> bool {
        false
    }

    /// Resolves when the far side went away; sinks without a far side never resolve
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    /// Final cleanup once the sink stops receiving windows
    async fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Register `sink` with the registry and feed it windows until its queue
/// closes, it fails, its far side disconnects, or shutdown fires. Always
/// deregisters on the way out.
pub async fn run_sink<S: WindowSink>(
    mut sink: S,
    registry: Arc<SubscriberRegistry>,
    queue_capacity: usize,
    mut shutdown: ShutdownListener,
) {
    let mut subscription = registry.register_with_capacity(queue_capacity).await;
    let name = sink.name();
    info!("Sink {} attached as {}", name, subscription.id);

    loop {
        tokio::select! {
            received = subscription.recv() => {
                let Some(stat) = received else {
                    debug!("Sink {} queue closed", name);
                    break;
                };
                if let Err(e) = sink.deliver(&stat).await {
                    if sink.ends_on_error() {
                        debug!("Sink {} ended: {}", name, e);
                        break;
                    }
                    error!("Sink {} lost window {}: {}", name, stat.timestamp, e);
                }
            }
            _ = sink.closed() => {
                debug!("Sink {} far side disconnected", name);
                break;
            }
            _ = shutdown.wait() => {
                // Deliver whatever was already queued before stopping
                while let Some(stat) = subscription.try_recv() {
                    if let Err(e) = sink.deliver(&stat).await {
                        warn!("Sink {} lost window {} during shutdown: {}", name, stat.timestamp, e);
                        if sink.ends_on_error() {
                            break;
                        }
                    }
                }
                break;
            }
        }
    }

    registry.deregister(subscription.id).await;
    if let Err(e) = sink.finish().await {
        warn!("Sink {} cleanup failed: {}", name, e);
    }
    info!("Sink {} detached", name);
}
