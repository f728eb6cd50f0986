//! A MySQL load-generation framework.
//!
//! A benchmark is a set of named **workloads**, each emitting one database
//! operation per event at a precisely shaped rate (uniform or Poisson
//! arrivals), fanned out over a configurable number of **workers** that each
//! own a connection. While the benchmark runs, a collector swaps every
//! worker's double-buffered latency histogram once per second, merges the
//! results per workload and globally, logs them to a local SQLite file, and
//! serves recent snapshots over a monitoring HTTP endpoint.
//!
//! Defining a workload means implementing [`workload::WorkloadInterface`]:
//!
//! ```no_run
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use mysql_loadgen::config::WorkloadConfig;
//! use mysql_loadgen::connection::Connection;
//! use mysql_loadgen::worker::WorkerContext;
//! use mysql_loadgen::workload::WorkloadInterface;
//!
//! struct PingWorkload {
//!     config: WorkloadConfig,
//! }
//!
//! #[async_trait]
//! impl WorkloadInterface for PingWorkload {
//!     type ContextData = ();
//!
//!     fn config(&self) -> &WorkloadConfig {
//!         &self.config
//!     }
//!
//!     async fn event(&self, ctx: &mut WorkerContext<()>) -> Result<()> {
//!         ctx.conn.query_drop("SELECT 1").await
//!     }
//!
//!     async fn new_context_data(&self, _conn: &mut Connection) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Wrap it in a [`workload::Workload`], register it on a
//! [`benchmark::Benchmark`], and drive the whole application through
//! [`benchmark::run`], which handles flag validation, the `--load` path,
//! signals, and shutdown ordering. See `src/bin/simplebench.rs` for a
//! complete benchmark.

pub mod benchmark;
pub mod collector;
pub mod config;
pub mod connection;
pub mod generator;
pub mod histogram;
pub mod logging;
pub mod looper;
pub mod random;
pub mod ring;
pub mod server;
pub mod shutdown;
pub mod table;
pub mod worker;
pub mod workload;

pub use benchmark::{run, Benchmark, BenchmarkInterface};
pub use config::{
    BenchmarkConfig, DatabaseConfig, RateControlConfig, VisualizationConfig, WorkloadConfig,
};
pub use connection::Connection;
pub use looper::LooperType;
pub use random::Rand;
pub use table::{Column, Table};
pub use worker::WorkerContext;
pub use workload::{AbstractWorkload, Workload, WorkloadInterface};
