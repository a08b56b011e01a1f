// src/tracker/shutdown.rs - Signal handling and ordered shutdown

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;

use crate::tracker::registry::SubscriberRegistry;

/// Shutdown phases for orderly termination, in the order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Tasks are asked to stop their loops
    Draining,
    /// No more windows will be produced; sinks flush and detach
    Flushing,
    /// Components are being shut down
    Terminating,
    /// Shutdown complete
    Stopped,
}

/// Configuration for shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time each component gets before it is reported as failed
    pub component_timeout_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            component_timeout_seconds: 5,
        }
    }
}

/// Component that needs a cleanup step when the process stops
#[async_trait::async_trait]
pub trait ShutdownComponent: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;
}

/// Cheap handle a task uses to notice that its stage of shutdown has begun
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    phase: watch::Receiver<ShutdownPhase>,
    stops_at: ShutdownPhase,
}

impl ShutdownListener {
    /// Resolves once the phase reaches this listener's stage; cancel safe
    pub async fn wait(&mut self) {
        let stops_at = self.stops_at;
        // An error means the sender is gone, which also means we are stopping
        let _ = self.phase.wait_for(|phase| *phase >= stops_at).await;
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.phase.borrow() >= self.stops_at
    }
}

/// Main shutdown manager
pub struct GracefulShutdown {
    config: ShutdownConfig,
    phase: watch::Sender<ShutdownPhase>,
    components: RwLock<Vec<Box<dyn ShutdownComponent>>>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            phase,
            components: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Listener for producers: fires as soon as shutdown is triggered
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            phase: self.phase.subscribe(),
            stops_at: ShutdownPhase::Draining,
        }
    }

    /// Listener for sinks: fires only once `flush_sinks` is called (or later),
    /// so windows produced while the producers wind down still reach them
    pub fn sink_listener(&self) -> ShutdownListener {
        ShutdownListener {
            phase: self.phase.subscribe(),
            stops_at: ShutdownPhase::Flushing,
        }
    }

    /// Register a component for shutdown, run in registration order
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent>) {
        let name = component.name().to_string();
        self.components.write().await.push(component);
        debug!("Registered shutdown component: {}", name);
    }

    /// Listen for SIGINT and SIGTERM and move to `Draining` on the first one
    pub fn start_signal_handlers(self: &Arc<Self>) {
        let on_ctrl_c = Arc::clone(self);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, shutting down...");
                    on_ctrl_c.trigger_shutdown();
                }
                Err(err) => {
                    error!("Failed to listen for Ctrl+C signal: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let on_sigterm = Arc::clone(self);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM signal, shutting down...");
                        on_sigterm.trigger_shutdown();
                    }
                    Err(err) => {
                        error!("Failed to register SIGTERM handler: {}", err);
                    }
                }
            });
        }

        info!("Shutdown signal handlers started");
    }

    /// Ask every task to stop (signal handlers, fatal errors, tests)
    pub fn trigger_shutdown(&self) {
        let changed = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Shutdown requested");
        }
    }

    /// Tell sinks to deliver what is queued and detach. Call once nothing
    /// produces windows any more.
    pub fn flush_sinks(&self) {
        self.trigger_shutdown();
        self.phase.send_if_modified(|phase| {
            if *phase < ShutdownPhase::Flushing {
                *phase = ShutdownPhase::Flushing;
                true
            } else {
                false
            }
        });
    }

    pub fn get_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.get_phase() != ShutdownPhase::Running
    }

    /// Shut down registered components; a failing component does not stop the others
    pub async fn perform_shutdown(&self) -> Vec<(String, String)> {
        self.trigger_shutdown();
        self.phase.send_replace(ShutdownPhase::Terminating);

        let component_timeout = Duration::from_secs(self.config.component_timeout_seconds);
        let components = self.components.read().await;
        let mut failed = Vec::new();

        for component in components.iter() {
            let name = component.name().to_string();
            match timeout(component_timeout, component.shutdown()).await {
                Ok(Ok(())) => info!("Component '{}' shut down", name),
                Ok(Err(e)) => {
                    error!("Component '{}' failed to shut down: {}", name, e);
                    failed.push((name, e.to_string()));
                }
                Err(_) => {
                    warn!("Component '{}' shutdown timed out", name);
                    failed.push((name, "shutdown timeout".to_string()));
                }
            }
        }

        self.phase.send_replace(ShutdownPhase::Stopped);
        info!("Shutdown complete");
        failed
    }
}

/// Closes every subscriber queue so connection tasks wind down
pub struct RegistryShutdownComponent {
    registry: Arc<SubscriberRegistry>,
}

impl RegistryShutdownComponent {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for RegistryShutdownComponent {
    fn name(&self) -> &str {
        "SubscriberRegistry"
    }

    async fn shutdown(&self) -> Result<()> {
        self.registry.close_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestComponent {
        name: String,
        shutdown_called: Arc<AtomicBool>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl ShutdownComponent for TestComponent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdown_called.store(true, Ordering::Relaxed);
            if self.should_fail {
                Err(anyhow::anyhow!("Test component shutdown failure"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_trigger_moves_to_draining() {
        let shutdown = GracefulShutdown::with_default_config();
        let mut listener = shutdown.listener();

        assert_eq!(shutdown.get_phase(), ShutdownPhase::Running);
        assert!(!listener.is_shutdown_requested());

        shutdown.trigger_shutdown();
        listener.wait().await;

        assert_eq!(shutdown.get_phase(), ShutdownPhase::Draining);
        assert!(listener.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_late_listener_still_sees_shutdown() {
        let shutdown = GracefulShutdown::with_default_config();
        shutdown.trigger_shutdown();

        let mut listener = shutdown.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .expect("listener created after trigger should resolve immediately");
    }

    #[tokio::test]
    async fn test_sink_listener_waits_for_flush_stage() {
        let shutdown = GracefulShutdown::with_default_config();
        let mut sinks = shutdown.sink_listener();

        shutdown.trigger_shutdown();
        assert!(!sinks.is_shutdown_requested());
        assert!(tokio::time::timeout(Duration::from_millis(20), sinks.wait()).await.is_err());

        shutdown.flush_sinks();
        tokio::time::timeout(Duration::from_secs(1), sinks.wait())
            .await
            .expect("sink listener should resolve once sinks are flushed");
        assert_eq!(shutdown.get_phase(), ShutdownPhase::Flushing);

        // Later phases never move backwards
        shutdown.perform_shutdown().await;
        shutdown.flush_sinks();
        assert_eq!(shutdown.get_phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn test_failing_component_does_not_block_others() {
        let shutdown = GracefulShutdown::with_default_config();
        let first_called = Arc::new(AtomicBool::new(false));
        let second_called = Arc::new(AtomicBool::new(false));

        shutdown
            .register_component(Box::new(TestComponent {
                name: "failing".to_string(),
                shutdown_called: Arc::clone(&first_called),
                should_fail: true,
            }))
            .await;
        shutdown
            .register_component(Box::new(TestComponent {
                name: "ok".to_string(),
                shutdown_called: Arc::clone(&second_called),
                should_fail: false,
            }))
            .await;

        let failed = shutdown.perform_shutdown().await;

        assert!(first_called.load(Ordering::Relaxed));
        assert!(second_called.load(Ordering::Relaxed));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "failing");
        assert_eq!(shutdown.get_phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn test_registry_component_closes_queues() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register().await;

        let shutdown = GracefulShutdown::with_default_config();
        shutdown
            .register_component(Box::new(RegistryShutdownComponent::new(Arc::clone(&registry))))
            .await;
        shutdown.perform_shutdown().await;

        assert_eq!(sub.recv().await, None);
    }
}
