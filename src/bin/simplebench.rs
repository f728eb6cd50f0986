//! A small but complete benchmark: one table, an insert workload, and a
//! point-select workload splitting the configured event rate 25/75.
//!
//! Load the table first, then benchmark:
//!
//! ```text
//! simplebench --load  --host db1 --numrows 1000000
//! simplebench --bench --host db1 --eventrate 5000 --duration 60
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use mysql_async::Params;
use mysql_loadgen::config::BenchmarkConfig;
use mysql_loadgen::generator::{
    AutoIncrementGenerator, UniformIntGenerator, UniformLengthStringGenerator,
};
use mysql_loadgen::logging;
use mysql_loadgen::workload::AbstractWorkload;
use mysql_loadgen::{
    BenchmarkInterface, Column, Connection, Table, Workload, WorkerContext, WorkloadConfig,
    WorkloadInterface,
};

const TABLE_NAME: &str = "simple_table";

#[derive(Parser, Clone)]
#[command(name = "simplebench")]
struct SimpleBenchArgs {
    #[command(flatten)]
    config: BenchmarkConfig,

    #[command(flatten)]
    logging: logging::Options,

    /// Number of rows to load into the benchmark table
    #[arg(long = "numrows", default_value_t = 1_000_000)]
    num_rows: u64,
}

fn simple_table(id_generator: AutoIncrementGenerator) -> Table {
    Table::new(
        TABLE_NAME,
        vec![
            Column::new("id", "BIGINT(20) NOT NULL", id_generator),
            Column::new("data", "VARCHAR(255)", UniformLengthStringGenerator::new(10, 200)),
            Column::new("b", "BIGINT(20)", UniformIntGenerator::new(0, 100_000)),
        ],
    )
    .with_primary_key(vec!["id"])
    .with_index(vec!["b"])
}

struct InsertSimpleRows {
    config: WorkloadConfig,
    table: Arc<Table>,
}

#[async_trait]
impl WorkloadInterface for InsertSimpleRows {
    type ContextData = mysql_async::Statement;

    fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    async fn event(&self, ctx: &mut WorkerContext<Self::ContextData>) -> Result<()> {
        let args = self.table.insert_args(&mut ctx.rng, 1, None);
        ctx.conn.exec_drop(&ctx.data, Params::Positional(args)).await
    }

    async fn new_context_data(&self, conn: &mut Connection) -> Result<Self::ContextData> {
        conn.prep(self.table.insert_statement(1)).await
    }
}

struct PointSelects {
    config: WorkloadConfig,
    table: Arc<Table>,
}

#[async_trait]
impl WorkloadInterface for PointSelects {
    type ContextData = mysql_async::Statement;

    fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    async fn event(&self, ctx: &mut WorkerContext<Self::ContextData>) -> Result<()> {
        let id = self.table.sample_existing(&mut ctx.rng, "id");
        ctx.conn.exec_drop(&ctx.data, (id,)).await
    }

    async fn new_context_data(&self, conn: &mut Connection) -> Result<Self::ContextData> {
        conn.prep(format!("SELECT * FROM `{TABLE_NAME}` WHERE id = ?")).await
    }
}

struct SimpleBench {
    args: SimpleBenchArgs,
}

#[async_trait]
impl BenchmarkInterface for SimpleBench {
    fn name(&self) -> String {
        "simplebench".to_string()
    }

    fn config(&self) -> BenchmarkConfig {
        self.args.config.clone()
    }

    async fn workloads(&self) -> Result<Vec<Arc<dyn AbstractWorkload>>> {
        // Resume the client-side id counter from whatever the loader (or a
        // previous benchmark run) left in the table.
        let id_generator =
            AutoIncrementGenerator::from_database(&self.args.config.database, TABLE_NAME, "id")
                .await?;
        let table = Arc::new(simple_table(id_generator));

        Ok(vec![
            Arc::new(Workload::new(InsertSimpleRows {
                config: WorkloadConfig::new("insert").with_scale(0.25),
                table: Arc::clone(&table),
            })),
            Arc::new(Workload::new(PointSelects {
                config: WorkloadConfig::new("point_select").with_scale(0.75),
                table,
            })),
        ])
    }

    async fn run_loader(&self) -> Result<()> {
        simple_table(AutoIncrementGenerator::new(0, 0))
            .reload_data(
                &self.args.config.database,
                self.args.num_rows,
                self.args.config.rate_control.concurrency,
            )
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = SimpleBenchArgs::parse();
    args.logging.init()?;

    mysql_loadgen::run(SimpleBench { args }).await
}
