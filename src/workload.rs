//! Workloads: named collections of workers driving one event stream.
//!
//! A workload is defined by implementing [`WorkloadInterface`] and wrapping
//! it in a [`Workload`]. The interface is typed by the per-worker context
//! data it needs; the benchmark orchestrator and the data collector only see
//! workloads through the context-erased [`AbstractWorkload`] capability.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::info;

use crate::config::{DatabaseConfig, RateControlConfig, WorkloadConfig};
use crate::connection::Connection;
use crate::histogram::OnlineHistogram;
use crate::shutdown::ShutdownReceiver;
use crate::worker::{BenchmarkWorker, WorkerContext};

/// User-provided definition of a workload. The framework calls `event`
/// repeatedly, at the configured rate, concurrently from every worker of the
/// workload; each worker passes its own [`WorkerContext`], so the event code
/// needs no synchronization of its own.
///
/// `ContextData` carries whatever per-worker state the events need (prepared
/// statements, usually). Workloads that need none use `()`.
#[async_trait]
pub trait WorkloadInterface: Send + Sync + 'static {
    type ContextData: Send + 'static;

    /// The workload's static configuration. Must always return the same
    /// value.
    fn config(&self) -> &WorkloadConfig;

    /// Runs one event. This is the unit of work whose latency is measured.
    async fn event(&self, ctx: &mut WorkerContext<Self::ContextData>) -> Result<()>;

    /// Builds one worker's context data. Called once per worker, with that
    /// worker's connection, before its event loop starts.
    async fn new_context_data(&self, conn: &mut Connection) -> Result<Self::ContextData>;
}

/// The context-erased view of a workload held by the benchmark orchestrator
/// and the data collector, so workloads with different context data types can
/// live in one registry.
#[async_trait]
pub trait AbstractWorkload: Send + Sync {
    fn config(&self) -> &WorkloadConfig;

    /// The rate control assigned by the orchestrator at benchmark start.
    /// Panics if called before [`finish_initialization`]
    /// (Self::finish_initialization); the collector only runs on started
    /// benchmarks.
    fn rate_control_config(&self) -> RateControlConfig;

    /// Assigns the database and scaled rate-control configuration. The
    /// orchestrator calls this before spawning the workload or the collector,
    /// so neither ever observes a half-initialized workload.
    fn finish_initialization(&self, database: DatabaseConfig, rate_control: RateControlConfig);

    /// Creates the workers and runs them to completion.
    async fn run(&self, shutdown: ShutdownReceiver, start_time: DateTime<Utc>) -> Result<()>;

    /// Invokes `f` with every worker's online histogram, in worker order.
    /// This is the collector's swap path: it must not allocate.
    fn for_each_online_histogram(&self, f: &mut dyn FnMut(usize, &OnlineHistogram));
}

#[derive(Clone)]
struct AssignedConfig {
    database: DatabaseConfig,
    rate_control: RateControlConfig,
}

/// The concrete workload for one [`WorkloadInterface`], fanning out to
/// `concurrency` workers.
pub struct Workload<W: WorkloadInterface> {
    iface: Arc<W>,
    assigned: RwLock<Option<AssignedConfig>>,
    histograms: RwLock<Vec<Arc<OnlineHistogram>>>,
}

impl<W: WorkloadInterface> Workload<W> {
    pub fn new(iface: W) -> Self {
        Self {
            iface: Arc::new(iface),
            assigned: RwLock::new(None),
            histograms: RwLock::new(Vec::new()),
        }
    }

    fn assigned(&self) -> AssignedConfig {
        self.assigned
            .read()
            .unwrap()
            .clone()
            .expect("workload has not been initialized by the benchmark yet")
    }
}

#[async_trait]
impl<W: WorkloadInterface> AbstractWorkload for Workload<W> {
    fn config(&self) -> &WorkloadConfig {
        self.iface.config()
    }

    fn rate_control_config(&self) -> RateControlConfig {
        self.assigned().rate_control
    }

    fn finish_initialization(&self, database: DatabaseConfig, rate_control: RateControlConfig) {
        *self.assigned.write().unwrap() = Some(AssignedConfig {
            database,
            rate_control,
        });
    }

    async fn run(&self, shutdown: ShutdownReceiver, start_time: DateTime<Utc>) -> Result<()> {
        let AssignedConfig {
            database,
            rate_control,
        } = self.assigned();
        let name = &self.config().name;

        info!(
            workload = %name,
            concurrency = rate_control.concurrency,
            rate = rate_control.event_rate,
            "starting benchmark workers"
        );

        // Workers are created up front so that a connection failure aborts
        // the start before any worker runs, and so every histogram is
        // registered before the collector's first swap.
        let mut workers = Vec::with_capacity(rate_control.concurrency);
        for i in 0..rate_control.concurrency {
            let worker =
                BenchmarkWorker::new(Arc::clone(&self.iface), &database, &rate_control, start_time)
                    .await
                    .with_context(|| format!("creating worker {i} of workload {name}"))?;
            workers.push(worker);
        }

        *self.histograms.write().unwrap() =
            workers.iter().map(|w| w.online_histogram()).collect();

        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown.clone())))
            .collect();

        // Fail fast: the first worker error aborts the workload (and with it
        // the benchmark) while the surviving workers drain on shutdown.
        let name = name.clone();
        try_join_all(handles.into_iter().enumerate().map(|(i, handle)| {
            let name = name.clone();
            async move {
                match handle.await {
                    Ok(result) => {
                        result.with_context(|| format!("worker {i} of workload {name} failed"))
                    }
                    Err(e) => Err(anyhow::Error::from(e)
                        .context(format!("worker {i} of workload {name} panicked"))),
                }
            }
        }))
        .await?;

        Ok(())
    }

    fn for_each_online_histogram(&self, f: &mut dyn FnMut(usize, &OnlineHistogram)) {
        for (i, hist) in self.histograms.read().unwrap().iter().enumerate() {
            f(i, hist);
        }
    }
}
