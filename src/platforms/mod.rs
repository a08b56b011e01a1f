use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::ChatMessage;

pub mod twitch;

/// Interface every upstream chat connection implements
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving messages
    async fn connect(&mut self) -> Result<()>;

    /// Get the platform identifier (e.g., "twitch")
    fn platform_name(&self) -> &str;

    /// Whether the stream ended because the server asked for a reconnect
    /// rather than because the connection failed
    fn reconnect_requested(&self) -> bool {
        false
    }

    /// Take the receiver for incoming messages. It closes when the connection ends.
    fn take_message_receiver(&mut self) -> Option<broadcast::Receiver<ChatMessage>>;

    /// Get list of channels this connection is active in
    fn get_channels(&self) -> Vec<String>;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;
}
