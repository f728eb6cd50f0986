//! Measures the overhead of the framework itself: workloads whose events do
//! no database work at all, so the recorded latencies and achieved rates
//! reflect only the looper, histogram, and collector machinery.
//!
//! ```text
//! selfbench --bench --eventrate 50000 --concurrency 64 --duration 30
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use mysql_loadgen::config::BenchmarkConfig;
use mysql_loadgen::logging;
use mysql_loadgen::workload::AbstractWorkload;
use mysql_loadgen::{
    BenchmarkInterface, Connection, Workload, WorkerContext, WorkloadConfig, WorkloadInterface,
};

#[derive(Parser, Clone)]
#[command(name = "selfbench")]
struct SelfBenchArgs {
    #[command(flatten)]
    config: BenchmarkConfig,

    #[command(flatten)]
    logging: logging::Options,

    /// Spin for this many microseconds per event to emulate query cost
    #[arg(long = "eventcost", default_value_t = 0)]
    event_cost_us: u64,
}

struct NoopEvents {
    config: WorkloadConfig,
    event_cost_us: u64,
}

#[async_trait]
impl WorkloadInterface for NoopEvents {
    type ContextData = ();

    fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    async fn event(&self, _ctx: &mut WorkerContext<()>) -> Result<()> {
        if self.event_cost_us > 0 {
            let deadline = std::time::Instant::now()
                + std::time::Duration::from_micros(self.event_cost_us);
            // Busy-spin rather than sleep: the tokio timer's granularity
            // would swamp microsecond-scale costs.
            while std::time::Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
        Ok(())
    }

    async fn new_context_data(&self, _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

struct SelfBench {
    args: SelfBenchArgs,
}

#[async_trait]
impl BenchmarkInterface for SelfBench {
    fn name(&self) -> String {
        "selfbench".to_string()
    }

    fn config(&self) -> BenchmarkConfig {
        let mut config = self.args.config.clone();
        config.database.no_connection = true;
        config
    }

    async fn workloads(&self) -> Result<Vec<Arc<dyn AbstractWorkload>>> {
        Ok(vec![Arc::new(Workload::new(NoopEvents {
            config: WorkloadConfig::new("selfbench"),
            event_cost_us: self.args.event_cost_us,
        }))])
    }

    async fn run_loader(&self) -> Result<()> {
        // There is no data to load; the workload never touches a database.
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = SelfBenchArgs::parse();
    args.logging.init()?;

    mysql_loadgen::run(SelfBench { args }).await
}
