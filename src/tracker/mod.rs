// src/tracker/mod.rs - Wires counters, scheduler, registry, sinks and upstream together

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod classifier;
pub mod counters;
pub mod ingest;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod upstream;

use crate::config::TrackerConfig;
use crate::platforms::twitch::{TwitchConfig, TwitchConnection};
use crate::platforms::PlatformConnection;
use crate::sinks::{run_sink, FileSink, LiveServer};
use classifier::{Classifier, PatternClassifier};
use counters::CounterPair;
use ingest::IngestionBridge;
use registry::SubscriberRegistry;
use scheduler::WindowScheduler;
use shutdown::{GracefulShutdown, RegistryShutdownComponent};
use upstream::{run_upstream, ConnectionFactory};

/// How long the file sink gets to flush its queue after shutdown
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The windowed +2/-2 tracker: one counter pair, one scheduler, one registry
pub struct Tracker {
    config: TrackerConfig,
    registry: Arc<SubscriberRegistry>,
    scheduler: Arc<WindowScheduler>,
    bridge: Arc<IngestionBridge>,
    shutdown: Arc<GracefulShutdown>,
}

impl Tracker {
    /// Build the tracker with the pattern classifier described by the config
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let classifier = PatternClassifier::from_config(&config.classifier)
            .context("Invalid classifier configuration")?;
        Ok(Self::with_classifier(config, Arc::new(classifier)))
    }

    pub fn with_classifier(config: TrackerConfig, classifier: Arc<dyn Classifier>) -> Self {
        let counters = Arc::new(CounterPair::new());
        let registry = Arc::new(SubscriberRegistry::new());
        let scheduler = Arc::new(WindowScheduler::new(
            Arc::clone(&counters),
            Arc::clone(&registry),
            Duration::from_secs(config.window.interval_seconds),
        ));
        let bridge = Arc::new(IngestionBridge::new(
            classifier,
            Arc::clone(&counters),
            &config.ingest,
        ));

        Self {
            config,
            registry,
            scheduler,
            bridge,
            shutdown: Arc::new(GracefulShutdown::with_default_config()),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<WindowScheduler> {
        &self.scheduler
    }

    pub fn bridge(&self) -> &Arc<IngestionBridge> {
        &self.bridge
    }

    pub fn shutdown(&self) -> &Arc<GracefulShutdown> {
        &self.shutdown
    }

    /// Factory for the configured Twitch channel
    pub fn twitch_factory(&self) -> ConnectionFactory {
        let twitch = TwitchConfig::from_upstream(&self.config.upstream);
        Arc::new(move || Box::new(TwitchConnection::new(twitch.clone())) as Box<dyn PlatformConnection>)
    }

    /// Open the sinks and spawn every task. Sink setup failures are fatal and
    /// returned before anything is spawned; a `None` factory runs without an upstream.
    pub async fn start(&self, factory: Option<ConnectionFactory>) -> Result<RunningTracker> {
        let file_sink = if self.config.file_sink.enabled {
            Some(
                FileSink::open(&self.config.file_sink)
                    .await
                    .context("Failed to open window log")?,
            )
        } else {
            None
        };

        let live_server = if self.config.live.enabled {
            Some(LiveServer::bind(&self.config.live, Arc::clone(&self.registry)).await?)
        } else {
            None
        };
        let live_addr = live_server.as_ref().map(LiveServer::local_addr).transpose()?;

        self.shutdown
            .register_component(Box::new(RegistryShutdownComponent::new(Arc::clone(&self.registry))))
            .await;

        let file_task = file_sink.map(|sink| {
            tokio::spawn(run_sink(
                sink,
                Arc::clone(&self.registry),
                self.config.file_sink.queue_capacity,
                self.shutdown.sink_listener(),
            ))
        });

        let live_task = live_server.map(|server| tokio::spawn(server.run(self.shutdown.sink_listener())));

        let scheduler = Arc::clone(&self.scheduler);
        let listener = self.shutdown.listener();
        let scheduler_task = tokio::spawn(async move { scheduler.run(listener).await });

        let upstream_task = factory.map(|factory| {
            tokio::spawn(run_upstream(
                factory,
                Arc::clone(&self.bridge),
                self.config.upstream.reconnect.clone(),
                Duration::from_secs(self.config.upstream.connect_timeout_seconds),
                self.shutdown.listener(),
            ))
        });

        #[cfg(feature = "web")]
        let status_task = self.config.status.enabled.then(|| {
            let server = crate::web::StatusServer::new(crate::web::StatusState {
                scheduler: Arc::clone(&self.scheduler),
                registry: Arc::clone(&self.registry),
                bridge: Arc::clone(&self.bridge),
            });
            let port = self.config.status.port;
            let listener = self.shutdown.listener();
            tokio::spawn(async move {
                if let Err(e) = server.start_server(port, listener).await {
                    log::error!("Status API failed: {:#}", e);
                }
            })
        });

        info!(
            "Tracker started: {}s windows, file sink {}, live sink {}",
            self.config.window.interval_seconds,
            if file_task.is_some() { "on" } else { "off" },
            live_addr.map(|a| a.to_string()).unwrap_or_else(|| "off".to_string()),
        );

        Ok(RunningTracker {
            shutdown: Arc::clone(&self.shutdown),
            live_addr,
            scheduler_task,
            file_task,
            live_task,
            upstream_task,
            #[cfg(feature = "web")]
            status_task,
        })
    }
}

/// Task handles of a started tracker
pub struct RunningTracker {
    shutdown: Arc<GracefulShutdown>,
    live_addr: Option<SocketAddr>,
    scheduler_task: JoinHandle<()>,
    file_task: Option<JoinHandle<()>>,
    live_task: Option<JoinHandle<()>>,
    upstream_task: Option<JoinHandle<Result<()>>>,
    #[cfg(feature = "web")]
    status_task: Option<JoinHandle<()>>,
}

impl RunningTracker {
    /// Address the live sink actually bound to
    pub fn live_addr(&self) -> Option<SocketAddr> {
        self.live_addr
    }

    /// Run until shutdown is requested or the upstream fails for good, then
    /// stop everything. Returns the upstream error, if that is why we stopped.
    pub async fn wait(mut self) -> Result<()> {
        let mut listener = self.shutdown.listener();

        let upstream_result = match self.upstream_task.take() {
            Some(mut upstream) => {
                tokio::select! {
                    joined = &mut upstream => Some(joined),
                    _ = listener.wait() => {
                        // Ingestion stops on the same signal; let it finish cleanly
                        Some((&mut upstream).await)
                    }
                }
            }
            None => {
                listener.wait().await;
                None
            }
        };

        let upstream_error = match upstream_result {
            Some(Ok(Ok(()))) | None => None,
            Some(Ok(Err(e))) => Some(e),
            Some(Err(e)) => Some(anyhow!("Upstream task panicked: {}", e)),
        };

        self.stop().await;

        match upstream_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Trigger shutdown (if not already) and wait for every task to wind down
    pub async fn stop(self) {
        // Sinks listen for a later stage, so they stay attached until the
        // scheduler has produced its last window
        self.shutdown.trigger_shutdown();
        if let Err(e) = self.scheduler_task.await {
            warn!("Window scheduler task failed: {}", e);
        }
        self.shutdown.flush_sinks();

        if let Some(task) = self.file_task {
            match tokio::time::timeout(SINK_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("File sink task failed: {}", e),
                Err(_) => warn!("File sink did not drain within {:?}", SINK_DRAIN_TIMEOUT),
            }
        }

        let failed = self.shutdown.perform_shutdown().await;
        for (component, reason) in failed {
            warn!("{} did not shut down cleanly: {}", component, reason);
        }

        if let Some(task) = self.live_task {
            if let Err(e) = task.await {
                warn!("Live sink task failed: {}", e);
            }
        }
        if let Some(task) = self.upstream_task {
            let _ = task.await;
        }
        #[cfg(feature = "web")]
        if let Some(task) = self.status_task {
            let _ = task.await;
        }

        info!("Tracker stopped");
    }
}
