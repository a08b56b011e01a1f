//! # plustwo-tracker
//!
//! Counts `+2` and `-2` reactions in a Twitch chat over fixed time windows
//! and fans every closed window out to an append-only log file and to live
//! WebSocket viewers.
//!
//! ## Features
//!
//! - **Windowed counting**: lock-free counter pair drained once per window
//! - **Configurable classification**: literal or `~/regex/flags` patterns, optional NFKC normalization
//! - **Fan-out**: bounded per-subscriber queues, slow viewers never stall the rest
//! - **Status API**: optional HTTP endpoints behind the `web` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plustwo_tracker::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tracker = Tracker::new(TrackerConfig::default())?;
//!     let running = tracker.start(Some(tracker.twitch_factory())).await?;
//!     tracker.shutdown().start_signal_handlers();
//!     running.wait().await
//! }
//! ```

pub mod config;
pub mod platforms;
pub mod sinks;
pub mod tracker;
pub mod types;

#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used items
pub mod prelude {
    pub use crate::config::{Cli, TrackerConfig};
    pub use crate::platforms::{
        twitch::{TwitchConfig, TwitchConnection},
        PlatformConnection,
    };
    pub use crate::sinks::{FileSink, LiveServer, WindowSink};
    pub use crate::tracker::classifier::{Classifier, PatternClassifier};
    pub use crate::tracker::registry::{SubscriberRegistry, Subscription};
    pub use crate::tracker::upstream::ConnectionFactory;
    pub use crate::tracker::{RunningTracker, Tracker};
    pub use crate::types::{ChatMessage, Classification, CounterKind, WindowStat};
    #[cfg(feature = "web")]
    pub use crate::web::{StatusServer, StatusState};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
