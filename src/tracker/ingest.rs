// src/tracker/ingest.rs - Feeds classified chat messages into the counters

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::config::{IngestConfig, IngestMode};
use crate::tracker::classifier::Classifier;
use crate::tracker::counters::CounterPair;
use crate::tracker::shutdown::ShutdownListener;
use crate::types::{ChatMessage, Classification, CounterKind};

/// Why an ingestion run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The upstream message channel closed (connection lost)
    UpstreamClosed,
    Shutdown,
}

#[derive(Debug, Default)]
struct IngestCounters {
    messages_seen: AtomicU64,
    positive: AtomicU64,
    negative: AtomicU64,
    lagged: AtomicU64,
}

/// Running totals since startup, across reconnects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub messages_seen: u64,
    pub positive: u64,
    pub negative: u64,
    /// Upstream messages skipped because ingestion fell behind
    pub lagged: u64,
}

/// Where classified tokens go during one run
enum Route<'a> {
    Direct(&'a CounterPair),
    Buffered(mpsc::Sender<CounterKind>),
}

/// Bridges the upstream message stream to the counter pair
pub struct IngestionBridge {
    classifier: Arc<dyn Classifier>,
    counters: Arc<CounterPair>,
    mode: IngestMode,
    buffer_capacity: usize,
    stats: IngestCounters,
}

impl IngestionBridge {
    pub fn new(classifier: Arc<dyn Classifier>, counters: Arc<CounterPair>, config: &IngestConfig) -> Self {
        Self {
            classifier,
            counters,
            mode: config.mode,
            buffer_capacity: config.buffer_capacity.max(1),
            stats: IngestCounters::default(),
        }
    }

    fn record(&self, classification: Classification) {
        self.stats.messages_seen.fetch_add(1, Ordering::Relaxed);
        for kind in classification.kinds() {
            let counter = match kind {
                CounterKind::Positive => &self.stats.positive,
                CounterKind::Negative => &self.stats.negative,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Classify one message and increment the counters right away
    pub fn ingest(&self, text: &str) -> Classification {
        let classification = self.classifier.classify(text);
        self.record(classification);
        for kind in classification.kinds() {
            self.counters.increment(*kind);
        }
        classification
    }

    /// Consume upstream messages until the channel closes or shutdown fires
    pub async fn run(
        &self,
        mut messages: broadcast::Receiver<ChatMessage>,
        mut shutdown: ShutdownListener,
    ) -> IngestOutcome {
        let (route, consumer) = match self.mode {
            IngestMode::Direct => (Route::Direct(self.counters.as_ref()), None),
            IngestMode::Buffered => {
                let (tx, rx) = mpsc::channel(self.buffer_capacity);
                let consumer = tokio::spawn(drain_tokens(rx, Arc::clone(&self.counters)));
                (Route::Buffered(tx), Some(consumer))
            }
        };
        info!("Ingestion started ({:?} mode)", self.mode);

        let outcome = loop {
            let message = tokio::select! {
                received = messages.recv() => received,
                _ = shutdown.wait() => break IngestOutcome::Shutdown,
            };

            match message {
                Ok(message) => {
                    let classification = self.classifier.classify(&message.content);
                    self.record(classification);
                    for kind in classification.kinds() {
                        match &route {
                            Route::Direct(counters) => counters.increment(*kind),
                            // Waiting here pushes back on the upstream reader
                            Route::Buffered(tx) => {
                                if tx.send(*kind).await.is_err() {
                                    warn!("Ingestion buffer consumer is gone, counting directly");
                                    self.counters.increment(*kind);
                                }
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Ingestion fell behind upstream, skipped {} messages", skipped);
                    self.stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Upstream message channel closed");
                    break IngestOutcome::UpstreamClosed;
                }
            }
        };

        // Let the consumer apply everything already buffered before returning
        drop(route);
        if let Some(consumer) = consumer {
            match consumer.await {
                Ok(applied) => debug!("Buffered consumer applied {} tokens", applied),
                Err(e) => warn!("Buffered consumer task failed: {}", e),
            }
        }

        outcome
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            messages_seen: self.stats.messages_seen.load(Ordering::Relaxed),
            positive: self.stats.positive.load(Ordering::Relaxed),
            negative: self.stats.negative.load(Ordering::Relaxed),
            lagged: self.stats.lagged.load(Ordering::Relaxed),
        }
    }
}

async fn drain_tokens(mut tokens: mpsc::Receiver<CounterKind>, counters: Arc<CounterPair>) -> u64 {
    let mut applied = 0;
    while let Some(first) = tokens.recv().await {
        // Apply whatever else is already queued as one batch per kind
        let (mut positive, mut negative) = (0u64, 0u64);
        let mut next = Some(first);
        while let Some(kind) = next {
            match kind {
                CounterKind::Positive => positive += 1,
                CounterKind::Negative => negative += 1,
            }
            next = tokens.try_recv().ok();
        }
        counters.add(CounterKind::Positive, positive);
        counters.add(CounterKind::Negative, negative);
        applied += positive + negative;
    }
    applied
}
