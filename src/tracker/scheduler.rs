// src/tracker/scheduler.rs - Fixed-interval window closing and fan-out

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::tracker::counters::CounterPair;
use crate::tracker::registry::{BroadcastReport, SubscriberRegistry};
use crate::tracker::shutdown::ShutdownListener;
use crate::types::WindowStat;

/// Closes a window every `interval`: drains the counters and broadcasts the totals
pub struct WindowScheduler {
    counters: Arc<CounterPair>,
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    latest: RwLock<Option<WindowStat>>,
    last_timestamp: AtomicI64,
    windows_emitted: AtomicU64,
}

impl WindowScheduler {
    pub fn new(counters: Arc<CounterPair>, registry: Arc<SubscriberRegistry>, interval: Duration) -> Self {
        Self {
            counters,
            registry,
            interval,
            latest: RwLock::new(None),
            last_timestamp: AtomicI64::new(i64::MIN),
            windows_emitted: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Timestamps must strictly increase even if the wall clock stalls or steps back
    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        let advance = |previous: i64| if now > previous { now } else { previous + 1 };

        let previous = match self.last_timestamp.fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(advance(p))) {
            Ok(p) | Err(p) => p,
        };
        let timestamp = advance(previous);
        if timestamp != now {
            debug!("Clock at {} not past previous window {}, using {}", now, previous, timestamp);
        }
        timestamp
    }

    /// Drain the counters into a new window, without broadcasting it
    pub async fn close_window(&self) -> WindowStat {
        let (positive, negative) = self.counters.drain();
        let stat = WindowStat::new(self.next_timestamp(), positive, negative);

        *self.latest.write().await = Some(stat);
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
        stat
    }

    /// Close the current window and hand it to every subscriber
    pub async fn tick(&self) -> (WindowStat, BroadcastReport) {
        let stat = self.close_window().await;
        info!(
            "Window {}: +2 x{} / -2 x{}",
            stat.timestamp, stat.positive_count, stat.negative_count
        );

        let report = self.registry.broadcast(stat).await;
        if report.dropped > 0 || report.pruned > 0 {
            warn!(
                "Window {} delivered to {} subscribers ({} lagging, {} gone)",
                stat.timestamp, report.delivered, report.dropped, report.pruned
            );
        } else {
            debug!("Window {} delivered to {} subscribers", stat.timestamp, report.delivered);
        }
        (stat, report)
    }

    /// Tick until shutdown. Late ticks are skipped, never replayed.
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        let Some(first_tick) = Instant::now().checked_add(self.interval) else {
            error!("Window interval {:?} is too long to schedule", self.interval);
            return;
        };
        let mut ticker = interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Window scheduler started ({}s windows)", self.interval.as_secs_f64());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.wait() => {
                    info!("Window scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Window scheduler stopped after {} windows", self.windows_emitted());
    }

    pub async fn latest(&self) -> Option<WindowStat> {
        *self.latest.read().await
    }

    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted.load(Ordering::Relaxed)
    }
}
