//! The benchmark orchestrator: owns the workload registry, the snapshot
//! ring, and the lifecycles of the worker, collector, and monitoring tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collector::{DataLogger, DataSnapshot};
use crate::config::BenchmarkConfig;
use crate::ring::Ring;
use crate::server::{HttpServer, StatusSource};
use crate::shutdown::{self, ShutdownSender};
use crate::workload::AbstractWorkload;

/// How often the data collector snapshots the workers' histograms.
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// How much history the snapshot ring keeps.
const LOG_RING_WINDOW: Duration = Duration::from_secs(10 * 60);

/// A single benchmark run: a set of named workloads driven at a target rate,
/// with telemetry collected once per [`LOG_INTERVAL`].
pub struct Benchmark {
    name: String,
    config: BenchmarkConfig,
    log_interval: Duration,

    workloads: Vec<Arc<dyn AbstractWorkload>>,
    ring: Arc<Ring<Arc<DataSnapshot>>>,

    start_time: Option<DateTime<Utc>>,
    running: Option<RunningState>,
    failure_rx: Option<mpsc::UnboundedReceiver<anyhow::Error>>,
}

struct RunningState {
    workload_shutdown: ShutdownSender,
    workload_handles: Vec<JoinHandle<()>>,

    collector_shutdown: ShutdownSender,
    collector_handle: JoinHandle<()>,

    server_shutdown: ShutdownSender,
    server_handle: JoinHandle<Result<()>>,
}

impl Benchmark {
    pub fn new(name: impl Into<String>, config: BenchmarkConfig) -> Self {
        let ring_size = (LOG_RING_WINDOW.as_secs() / LOG_INTERVAL.as_secs()) as usize + 1;

        Self {
            name: name.into(),
            config,
            log_interval: LOG_INTERVAL,
            workloads: Vec::new(),
            ring: Arc::new(Ring::new(ring_size)),
            start_time: None,
            running: None,
            failure_rx: None,
        }
    }

    /// Registers a workload. Workload names must be unique within a
    /// benchmark, and a workload's scale must be in (0, 1].
    pub fn add_workload(&mut self, workload: Arc<dyn AbstractWorkload>) -> Result<()> {
        let config = workload.config();
        if self.workloads.iter().any(|w| w.config().name == config.name) {
            bail!("a workload named {} was already added", config.name);
        }

        if config.scale <= 0.0 || config.scale > 1.0 {
            bail!(
                "workload {} has scale {}, which is outside (0, 1]",
                config.name,
                config.scale
            );
        }

        debug!(workload = %config.name, "added workload");
        self.workloads.push(workload);
        Ok(())
    }

    /// Freezes the start time, assigns each workload its scaled rate control,
    /// and launches the worker, collector, and monitoring tasks.
    pub fn start(&mut self) -> Result<()> {
        if self.start_time.is_some() {
            bail!("benchmark was already started");
        }

        if self.workloads.is_empty() {
            bail!("no workloads were added to the benchmark");
        }

        let start_time = Utc::now();
        self.start_time = Some(start_time);

        let (workload_shutdown, workload_shutdown_rx) = shutdown::channel();
        let (collector_shutdown, collector_shutdown_rx) = shutdown::channel();
        let (server_shutdown, server_shutdown_rx) = shutdown::channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        self.failure_rx = Some(failure_rx);

        let mut workload_handles = Vec::with_capacity(self.workloads.len());
        for workload in &self.workloads {
            // The rate control must be assigned before either the workload
            // task or the collector task runs, as both read it.
            workload.finish_initialization(
                self.config.database.clone(),
                self.config.rate_control.scaled(workload.config().scale),
            );

            let workload = Arc::clone(workload);
            let shutdown_rx = workload_shutdown_rx.clone();
            let failure_tx = failure_tx.clone();
            workload_handles.push(tokio::spawn(async move {
                if let Err(e) = workload.run(shutdown_rx, start_time).await {
                    error!(workload = %workload.config().name, error = %e, "workload failed");
                    let _ = failure_tx.send(e);
                }
            }));
        }
        drop(workload_shutdown_rx);

        let data_logger = DataLogger::new(
            self.log_interval,
            self.config.log_file.clone(),
            self.config.log_table.clone(),
            self.config.note.clone(),
            self.name.clone(),
            self.workloads.clone(),
            Arc::clone(&self.ring),
        )?;
        // Collector failures (the log sink above all) are fatal for the whole
        // run, so they feed the same failure channel as the workloads.
        let collector_failure_tx = failure_tx.clone();
        let collector_handle = tokio::spawn(async move {
            if let Err(e) = data_logger.run(collector_shutdown_rx, start_time).await {
                error!(error = %e, "data collector failed");
                let _ = collector_failure_tx.send(e);
            }
        });

        let server = HttpServer::new(
            self.config.http_port,
            StatusSource {
                ring: Arc::clone(&self.ring),
                workload_names: self
                    .workloads
                    .iter()
                    .map(|w| w.config().name.clone())
                    .collect(),
                start_time,
                note: self.config.note.clone(),
            },
        );
        let server_handle = tokio::spawn(server.run(server_shutdown_rx));

        self.running = Some(RunningState {
            workload_shutdown,
            workload_handles,
            collector_shutdown,
            collector_handle,
            server_shutdown,
            server_handle,
        });

        Ok(())
    }

    /// Resolves when any workload reports a failure. Used to stop the whole
    /// benchmark on the first worker error.
    pub async fn wait_for_failure(&mut self) -> Option<anyhow::Error> {
        match &mut self.failure_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Stops everything, in dependency order: the workloads are cancelled and
    /// joined first, and only then the collector, so the collector lives long
    /// enough to observe the workers' final histograms. Returns the first
    /// error any task reported.
    pub async fn stop_and_wait(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            bail!("benchmark is not running");
        };

        running.workload_shutdown.shutdown().await;
        for handle in running.workload_handles {
            if let Err(e) = handle.await {
                error!(error = %e, "workload task panicked");
            }
        }

        running.collector_shutdown.shutdown().await;
        running
            .collector_handle
            .await
            .context("collector task panicked")?;

        running.server_shutdown.shutdown().await;
        if let Err(e) = running.server_handle.await.context("server task panicked")? {
            warn!(error = %e, "monitoring server failed");
        }

        if let Some(rx) = &mut self.failure_rx {
            if let Ok(e) = rx.try_recv() {
                return Err(e);
            }
        }

        Ok(())
    }

    /// The snapshots currently retained in the ring, oldest first.
    pub fn data_snapshots(&self) -> Vec<Arc<DataSnapshot>> {
        self.ring.read_all_ordered()
    }

    pub fn workload_names(&self) -> Vec<String> {
        self.workloads
            .iter()
            .map(|w| w.config().name.clone())
            .collect()
    }

    pub fn note(&self) -> &str {
        &self.config.note
    }

    pub fn seconds_since_start(&self) -> f64 {
        match self.start_time {
            Some(start) => (Utc::now() - start)
                .num_microseconds()
                .unwrap_or(i64::MAX) as f64
                / 1e6,
            None => 0.0,
        }
    }
}

/// The contract a benchmark application implements to be driven by [`run`].
#[async_trait]
pub trait BenchmarkInterface {
    /// The name of the benchmark, recorded in the log file's meta table.
    fn name(&self) -> String;

    /// The application's configuration. [`run`] validates it and fills in
    /// the derived defaults.
    fn config(&self) -> BenchmarkConfig;

    /// Constructs this benchmark's workloads.
    async fn workloads(&self) -> Result<Vec<Arc<dyn AbstractWorkload>>>;

    /// Loads the database. Called instead of benchmarking when `--load` is
    /// given.
    async fn run_loader(&self) -> Result<()>;
}

/// Runs a benchmark application end to end: validates the configuration,
/// creates the database if needed, runs either the loader or the benchmark,
/// and shuts down cleanly on SIGINT/SIGTERM or after `--duration` elapses.
pub async fn run(benchmark_interface: impl BenchmarkInterface) -> Result<()> {
    let mut config = benchmark_interface.config();
    config.validate_and_set_defaults()?;

    config
        .database
        .create_database_if_needed()
        .await
        .context("cannot create the benchmark database")?;

    if config.load {
        return benchmark_interface.run_loader().await;
    }

    let mut benchmark = Benchmark::new(benchmark_interface.name(), config.clone());
    for workload in benchmark_interface.workloads().await? {
        benchmark.add_workload(workload)?;
    }

    benchmark.start()?;

    if config.duration.is_zero() {
        info!("running benchmark until interrupted");
    } else {
        info!("running benchmark for {:?}", config.duration);
    }

    let mut failure = None;
    tokio::select! {
        signal = termination_signal() => {
            warn!(signal, "received termination signal");
        }
        _ = tokio::time::sleep(config.duration), if !config.duration.is_zero() => {
            info!("benchmark duration elapsed");
        }
        Some(e) = benchmark.wait_for_failure() => {
            failure = Some(e);
        }
    }

    benchmark.stop_and_wait().await?;
    info!("benchmark stopped");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Resolves when SIGINT or SIGTERM arrives, returning the signal's name.
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}
