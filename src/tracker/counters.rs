// src/tracker/counters.rs - Lock-free counter pair drained once per window

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::CounterKind;

/// Two independent counters for the current window.
///
/// Each counter is drained with an atomic swap-to-zero, so an increment lands
/// either in the window being closed or in the next one, never in both and
/// never in neither.
#[derive(Debug, Default)]
pub struct CounterPair {
    positive: AtomicU64,
    negative: AtomicU64,
}

impl CounterPair {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: CounterKind) -> &AtomicU64 {
        match kind {
            CounterKind::Positive => &self.positive,
            CounterKind::Negative => &self.negative,
        }
    }

    pub fn increment(&self, kind: CounterKind) {
        self.add(kind, 1);
    }

    /// Add several events at once (used by the buffered ingestion path)
    pub fn add(&self, kind: CounterKind, count: u64) {
        if count == 0 {
            return;
        }
        self.counter(kind).fetch_add(count, Ordering::Relaxed);
    }

    /// Current (positive, negative) without resetting
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.positive.load(Ordering::Acquire),
            self.negative.load(Ordering::Acquire),
        )
    }

    pub fn reset(&self) {
        self.positive.store(0, Ordering::Release);
        self.negative.store(0, Ordering::Release);
    }

    /// Read both counters and zero them in one step
    pub fn drain(&self) -> (u64, u64) {
        (
            self.positive.swap(0, Ordering::AcqRel),
            self.negative.swap(0, Ordering::AcqRel),
        )
    }
}
