/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Restores one probe task per stored target on startup
/// - Applies configuration commands to the target store and the live
///   monitor registry (`intake`)
/// - Hands probe results to the publisher (`publisher`)
/// - Stops everything on shutdown

pub mod intake;
pub mod publisher;


pub use publisher::ResultPublisher;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::command::ConfigCommand;
use crate::config::Config;
use crate::database::{LibsqlTargetStore, StoreError, Target, TargetStore, initialize_database};
use crate::monitoring::{
    HttpProber, MonitorHandle, MonitorRegistry, ProbeResult, ProbeTask, Prober, StoppedMonitor,
};
use crate::pool::LibsqlPool;
use crate::transport::{AmqpBroker, Broker};

/// Queue names and retry timing used by the orchestrator.
#[derive(Debug, Clone)]
pub struct Settings {
    pub request_queue: String,
    pub result_queue: String,
    pub reconnect_delay: Duration,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            request_queue: config.amqp.request_queue.clone(),
            result_queue: config.amqp.result_queue.clone(),
            reconnect_delay: config.amqp.reconnect_delay(),
        }
    }
}

/// Main orchestrator for the monitor service
pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn TargetStore>,
    broker: Arc<dyn Broker>,
    prober: Arc<dyn Prober>,
    monitors: Arc<MonitorRegistry>,
    results: mpsc::Sender<ProbeResult>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create and start a new orchestrator against the configured AMQP
    /// broker and the given database, running until ctrl-c.
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        info!("Initializing database schema...");
        initialize_database(&pool).await.context("failed to initialize database")?;

        let store = Arc::new(LibsqlTargetStore::new(pool));
        let broker = Arc::new(AmqpBroker::new(config.amqp.url.clone()));
        let prober = Arc::new(
            HttpProber::new(config.probe.timeout(), &config.probe.user_agent)
                .context("failed to build HTTP client")?,
        );

        let (results_tx, results_rx) = mpsc::channel(config.probe.result_buffer);
        let settings = Settings::from(&config);
        let publisher = ResultPublisher::new(broker.clone(), settings.result_queue.clone(), results_rx);
        let orchestrator = Arc::new(Self::new(settings, store, broker, prober, results_tx));

        let shutdown = orchestrator.shutdown_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!("Failed to listen for ctrl-c, shutting down: {}", e),
            }
            shutdown.cancel();
        });

        orchestrator.run(publisher).await
    }

    pub fn new(
        settings: Settings,
        store: Arc<dyn TargetStore>,
        broker: Arc<dyn Broker>,
        prober: Arc<dyn Prober>,
        results: mpsc::Sender<ProbeResult>,
    ) -> Self {
        Self {
            settings,
            store,
            broker,
            prober,
            monitors: Arc::new(MonitorRegistry::new()),
            results,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Failing to reach the broker or to read the store here is fatal; after
    /// startup both are retried or logged instead.
    pub async fn run(&self, publisher: ResultPublisher) -> Result<()> {
        info!("Starting monitor orchestrator...");
        self.check_broker().await.context("failed to reach message broker")?;

        let publisher_handle = publisher.spawn(self.shutdown.clone());

        let restored = self.restore_monitors().await.context("failed to load stored targets")?;
        info!("Restored {} monitors from the target store", restored);

        self.consume_commands().await;

        if !self.monitors.is_empty() {
            info!("Stopping {} monitors", self.monitors.len());
        }
        for stopped in self.monitors.drain() {
            stopped.join().await;
        }
        if let Err(e) = publisher_handle.await {
            error!("Result publisher task failed: {}", e);
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn check_broker(&self) -> Result<(), crate::transport::TransportError> {
        let mut session = self.broker.connect().await?;
        let mut declared = session.declare_queue(&self.settings.request_queue).await;
        if declared.is_ok() {
            declared = session.declare_queue(&self.settings.result_queue).await;
        }
        session.close().await;
        declared
    }

    /// Start one probe task per stored target.
    pub async fn restore_monitors(&self) -> Result<usize, StoreError> {
        let targets = self.store.targets().await?;
        Ok(targets.iter().filter(|target| self.reconcile(target)).count())
    }

    /// Apply a validated command: persist it first, then align the registry.
    pub async fn apply_command(&self, command: ConfigCommand) -> Result<(), StoreError> {
        match command {
            ConfigCommand::Upsert { url, interval_seconds } => {
                let target = Target::new(url, interval_seconds);
                self.store.upsert(&target).await?;
                info!(url = %target.url, interval_seconds, "Stored target");
                self.reconcile(&target);
            }
            ConfigCommand::Delete { url } => {
                if self.store.delete(&url).await? {
                    info!(url = %url, "Deleted target");
                    self.stop_monitoring(&url);
                } else {
                    info!(url = %url, "Delete for unknown target ignored");
                }
            }
        }
        Ok(())
    }

    /// Ensure a probe task runs for `target`. An already running task picks
    /// up a changed interval from the store before its next sleep, so only
    /// a missing task needs action. Returns whether a task was started.
    pub fn reconcile(&self, target: &Target) -> bool {
        let started = self.monitors.insert_if_absent(&target.url, |id| {
            let cancel = self.shutdown.child_token();
            let task = ProbeTask::new(
                id,
                target.url.clone(),
                target.interval(),
                self.prober.clone(),
                self.store.clone(),
                self.results.clone(),
                self.monitors.clone(),
                cancel.clone(),
            );
            MonitorHandle::new(id, cancel, task.spawn())
        });

        if !started {
            debug!(url = %target.url, "Monitor already running");
        }
        started
    }

    /// Cancel the probe task for `url`, if any. The task exits at its next
    /// cancellation check; an in-flight probe is not interrupted but its
    /// result is discarded.
    pub fn stop_monitoring(&self, url: &str) -> Option<StoppedMonitor> {
        let stopped = self.monitors.remove(url);
        if stopped.is_some() {
            info!(url = %url, "Stopped monitoring");
        }
        stopped
    }
}
