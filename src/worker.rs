//! A benchmark worker: one thread of control owning one database connection,
//! one RNG, one online histogram, and one rate-controlling looper.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{DatabaseConfig, RateControlConfig};
use crate::connection::Connection;
use crate::histogram::OnlineHistogram;
use crate::looper::{DiscretizedLooper, LooperEvents};
use crate::random::Rand;
use crate::shutdown::ShutdownReceiver;
use crate::workload::WorkloadInterface;

/// Everything an event callback may touch that is private to its worker. The
/// framework never shares a context between workers, so event code can use it
/// without synchronization.
pub struct WorkerContext<D> {
    pub conn: Connection,
    pub rng: Rand,
    pub data: D,
}

/// A single worker driving one rate-controlled event stream for a workload.
pub struct BenchmarkWorker<W: WorkloadInterface> {
    iface: Arc<W>,
    online_hist: Arc<OnlineHistogram>,
    context: WorkerContext<W::ContextData>,
    looper: DiscretizedLooper,
}

impl<W: WorkloadInterface> BenchmarkWorker<W> {
    /// Opens the worker's connection and builds its per-worker context. A
    /// failure here aborts the whole workload start.
    pub async fn new(
        iface: Arc<W>,
        database: &DatabaseConfig,
        rate_control: &RateControlConfig,
        start_time: DateTime<Utc>,
    ) -> Result<Self> {
        let mut conn = database.connection().await?;
        let data = iface.new_context_data(&mut conn).await?;

        let looper = DiscretizedLooper {
            // Every worker drives an equal share of the workload's rate.
            event_rate: rate_control.event_rate / rate_control.concurrency as f64,
            outer_loop_rate: rate_control.outer_loop_rate,
            looper_type: rate_control.looper_type,
        };

        Ok(Self {
            iface,
            online_hist: Arc::new(OnlineHistogram::new(start_time)),
            context: WorkerContext {
                conn,
                rng: Rand::new(),
                data,
            },
            looper,
        })
    }

    /// The worker's histogram, shared with the data collector.
    pub fn online_histogram(&self) -> Arc<OnlineHistogram> {
        Arc::clone(&self.online_hist)
    }

    /// Runs the looper to completion and closes the connection on the way
    /// out, on both the success and the error path.
    pub async fn run(self, shutdown: ShutdownReceiver) -> Result<()> {
        let BenchmarkWorker {
            iface,
            online_hist,
            mut context,
            looper,
        } = self;

        let result = {
            let mut events = WorkerEvents {
                iface: &*iface,
                context: &mut context,
                online_hist: &online_hist,
            };
            looper.run(&mut events, shutdown).await
        };

        if let Err(error) = context.conn.close().await {
            warn!(%error, "failed to close worker connection");
        }

        result
    }
}

struct WorkerEvents<'a, W: WorkloadInterface> {
    iface: &'a W,
    context: &'a mut WorkerContext<W::ContextData>,
    online_hist: &'a OnlineHistogram,
}

#[async_trait]
impl<W: WorkloadInterface> LooperEvents for WorkerEvents<'_, W> {
    async fn event(&mut self) -> Result<()> {
        self.iface.event(self.context).await
    }

    fn trace_event(&mut self, latency: Duration) {
        self.online_hist.record(latency.as_micros() as u64);
    }
}
