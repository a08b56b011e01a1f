// src/tracker/upstream.rs - Keeps the upstream chat connection feeding the ingestion bridge

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReconnectConfig;
use crate::platforms::PlatformConnection;
use crate::tracker::ingest::{IngestOutcome, IngestionBridge};
use crate::tracker::shutdown::ShutdownListener;

/// Builds a fresh, unconnected platform connection for every attempt
pub type ConnectionFactory = Arc<dyn Fn() -> Box<dyn PlatformConnection> + Send + Sync>;

/// Delay before reconnect attempt `attempt` (1-based): doubles from the
/// initial backoff and is capped at the maximum
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let millis = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    Duration::from_millis(millis)
}

/// How one connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    /// The server asked us to reconnect (e.g. Twitch maintenance)
    ReconnectRequested,
    /// The connection dropped on its own
    Closed,
}

/// Connect once and ingest until the connection ends or shutdown fires
async fn run_session(
    factory: &ConnectionFactory,
    bridge: &IngestionBridge,
    connect_timeout: Duration,
    shutdown: &ShutdownListener,
) -> Result<SessionEnd> {
    let mut connection = factory();
    let platform = connection.platform_name().to_string();

    let mut listener = shutdown.clone();
    let connected = tokio::select! {
        result = tokio::time::timeout(connect_timeout, connection.connect()) => result,
        _ = listener.wait() => return Ok(SessionEnd::Shutdown),
    };
    connected
        .map_err(|_| anyhow!("Connection to {} timed out after {:?}", platform, connect_timeout))?
        .with_context(|| format!("Failed to connect to {}", platform))?;

    let messages = connection
        .take_message_receiver()
        .ok_or_else(|| anyhow!("{} connection produced no message stream", platform))?;
    info!("Reading chat from {} on {:?}", platform, connection.get_channels());

    let outcome = bridge.run(messages, shutdown.clone()).await;
    let reconnect_requested = connection.reconnect_requested();

    if let Err(e) = connection.disconnect().await {
        warn!("Error disconnecting from {}: {}", platform, e);
    }

    Ok(match outcome {
        IngestOutcome::Shutdown => SessionEnd::Shutdown,
        IngestOutcome::UpstreamClosed if reconnect_requested => SessionEnd::ReconnectRequested,
        IngestOutcome::UpstreamClosed => SessionEnd::Closed,
    })
}

/// Drive the upstream connection until shutdown.
///
/// A server-requested reconnect is always honoured right away. Otherwise,
/// with reconnect disabled any connection failure or disconnect is returned
/// as an error so the process can exit non-zero. With reconnect enabled the
/// connection is retried with exponential backoff; a session that delivered
/// messages resets the attempt counter.
pub async fn run_upstream(
    factory: ConnectionFactory,
    bridge: Arc<IngestionBridge>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    let mut attempt = 0u32;

    loop {
        let seen_before = bridge.stats().messages_seen;
        let result = run_session(&factory, &bridge, connect_timeout, &shutdown).await;

        let failure = match result {
            Ok(SessionEnd::Shutdown) => {
                info!("Upstream stopped for shutdown");
                return Ok(());
            }
            Ok(SessionEnd::ReconnectRequested) => {
                info!("Upstream asked for a reconnect, reconnecting now");
                attempt = 0;
                continue;
            }
            Ok(SessionEnd::Closed) => anyhow!("Upstream connection closed"),
            Err(e) => e,
        };

        if shutdown.is_shutdown_requested() {
            return Ok(());
        }
        if !reconnect.enabled {
            error!("Upstream failed and reconnect is disabled: {:#}", failure);
            return Err(failure);
        }

        if bridge.stats().messages_seen > seen_before {
            attempt = 0;
        }
        attempt += 1;
        if attempt > reconnect.max_attempts {
            bail!(
                "Upstream failed after {} reconnect attempts: {:#}",
                reconnect.max_attempts,
                failure
            );
        }

        let delay = backoff_delay(&reconnect, attempt);
        warn!(
            "Upstream failed ({:#}), reconnect attempt {}/{} in {:?}",
            failure, attempt, reconnect.max_attempts, delay
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait() => return Ok(()),
        }
    }
}
