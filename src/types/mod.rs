// src/types/mod.rs - Message and window types shared across the tracker

use serde::{Deserialize, Serialize};

/// A chat message as delivered by a platform connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub platform: String,
    pub channel: String,
    pub username: String,
    pub display_name: Option<String>,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    /// Build a message with the current time, mostly useful for feeding the pipeline by hand
    pub fn new(platform: &str, channel: &str, username: &str, content: &str) -> Self {
        Self {
            platform: platform.to_string(),
            channel: channel.to_string(),
            username: username.to_string(),
            display_name: None,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Which of the two window counters an event feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Positive,
    Negative,
}

/// Outcome of running a message through the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Positive,
    Negative,
    /// Matched a positive and a negative pattern; both counters move
    Both,
    None,
}

impl Classification {
    /// Counters this classification increments, in a fixed order
    pub fn kinds(&self) -> &'static [CounterKind] {
        match self {
            Classification::Positive => &[CounterKind::Positive],
            Classification::Negative => &[CounterKind::Negative],
            Classification::Both => &[CounterKind::Positive, CounterKind::Negative],
            Classification::None => &[],
        }
    }

    pub fn from_matches(positive: bool, negative: bool) -> Self {
        match (positive, negative) {
            (true, true) => Classification::Both,
            (true, false) => Classification::Positive,
            (false, true) => Classification::Negative,
            (false, false) => Classification::None,
        }
    }
}

/// Totals for one closed window.
///
/// The serialized field names are the ones live subscribers already consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStat {
    #[serde(rename = "Time")]
    pub timestamp: i64,
    #[serde(rename = "PlusTwos")]
    pub positive_count: u64,
    #[serde(rename = "MinusTwos")]
    pub negative_count: u64,
}

impl WindowStat {
    pub fn new(timestamp: i64, positive_count: u64, negative_count: u64) -> Self {
        Self {
            timestamp,
            positive_count,
            negative_count,
        }
    }

    /// Render as one delimited record, newline terminated
    pub fn to_record(&self, delimiter: char) -> String {
        format!(
            "{ts}{d}{pos}{d}{neg}\n",
            ts = self.timestamp,
            pos = self.positive_count,
            neg = self.negative_count,
            d = delimiter,
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
