//! Benchmark, database, and rate-control configuration, exposed as a stable
//! command-line surface that applications flatten into their own parsers.

use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use tracing::warn;

use crate::looper::LooperType;

pub fn seconds_as_str_to_duration(input: &str) -> Result<Duration, ParseIntError> {
    Ok(Duration::from_secs(u64::from_str(input)?))
}

/// Connection parameters for the benchmarked database. Each worker turns this
/// into its own [`Connection`](crate::connection::Connection); connections
/// are never shared between workers.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct DatabaseConfig {
    /// Database host name
    #[arg(long = "host", default_value = "")]
    pub host: String,

    /// Database port
    #[arg(long = "port", default_value_t = 3306)]
    pub port: u16,

    /// Database user
    #[arg(long = "user", default_value = "root")]
    pub user: String,

    /// Database password
    #[arg(long = "pass", default_value = "")]
    pub pass: String,

    /// Database name
    #[arg(long = "db", default_value = "loadgen")]
    pub database: String,

    /// Number of database connections per parallel worker, implemented as a
    /// static pool fetched round-robin. Only useful to assess the performance
    /// impact of the overall number of open connections.
    #[arg(long = "connectionmultiplier", default_value_t = 1)]
    pub connection_multiplier: usize,

    /// Enable support for CLIENT_MULTI_STATEMENTS on the connection
    #[arg(long = "clientmultistatements")]
    pub client_multi_statements: bool,

    /// If set, workers will not open any database connection. Useful for
    /// benchmarking the framework itself and for tests.
    #[arg(skip)]
    pub no_connection: bool,
}

/// Controls the rate at which a workload's events run.
#[derive(clap::Args, Clone, Debug)]
pub struct RateControlConfig {
    /// Target event rate of the benchmark in events per second, across all
    /// workers
    #[arg(long = "eventrate", default_value_t = 1000.0)]
    pub event_rate: f64,

    /// Number of parallel workers driving the event rate (0 = derive from
    /// the event rate and the per-worker maximum)
    #[arg(long = "concurrency", default_value_t = 0)]
    pub concurrency: usize,

    /// Maximum event rate per worker
    #[arg(long = "workermaxrate", default_value_t = 100.0)]
    pub max_event_rate_per_worker: f64,

    /// Desired rate of the outer loop that batches events -- advanced option
    #[arg(long = "outerlooprate", default_value_t = 50.0)]
    pub outer_loop_rate: f64,

    /// The arrival process used by each worker's looper.
    #[arg(skip)]
    pub looper_type: LooperType,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            event_rate: 1000.0,
            concurrency: 0,
            max_event_rate_per_worker: 100.0,
            outer_loop_rate: 50.0,
            looper_type: LooperType::default(),
        }
    }
}

impl RateControlConfig {
    /// Derives the rate control for one workload by scaling the
    /// benchmark-global configuration by the workload's scale factor.
    /// Concurrency rounds up and is kept within `ceil(event_rate)` so no
    /// worker averages less than one event per second.
    pub fn scaled(&self, scale: f64) -> RateControlConfig {
        let mut scaled = self.clone();
        scaled.event_rate = self.event_rate * scale;
        scaled.concurrency = (self.concurrency as f64 * scale).ceil() as usize;

        if scaled.concurrency == 0 {
            scaled.concurrency = (scaled.event_rate as usize).max(1);
        }

        let max_concurrency = scaled.event_rate.ceil() as usize;
        if scaled.concurrency > max_concurrency {
            scaled.concurrency = max_concurrency.max(1);
        }

        scaled
    }
}

/// Bounds of the fixed-width histogram used for data logging and the web UI.
/// This does not affect latency tracking itself, which always uses the full
/// HDR histogram range; a workload that knows its latency envelope can pick a
/// better display scale. Units are microseconds.
#[derive(Clone, Copy, Debug)]
pub struct VisualizationConfig {
    pub latency_hist_min: i64,
    pub latency_hist_max: i64,
    pub latency_hist_size: i64,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            latency_hist_min: 0,
            latency_hist_max: 50_000,
            latency_hist_size: 1000,
        }
    }
}

/// Static configuration of one workload.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// The name of the workload, for identification purposes only. Must be
    /// unique within a benchmark.
    pub name: String,

    /// Scales this workload's share of the benchmark-global event rate and
    /// concurrency. Must be in (0, 1].
    pub scale: f64,

    pub visualization: VisualizationConfig,
}

impl WorkloadConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scale: 1.0,
            visualization: VisualizationConfig::default(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_visualization(mut self, visualization: VisualizationConfig) -> Self {
        self.visualization = visualization;
        self
    }
}

/// The benchmark application's command-line surface.
#[derive(clap::Parser, Clone, Debug)]
pub struct BenchmarkConfig {
    /// Load the data before the benchmark
    #[arg(long)]
    pub load: bool,

    /// Run the benchmark
    #[arg(long)]
    pub bench: bool,

    /// Duration of the benchmark in seconds (0 = run until interrupted)
    #[arg(long, value_parser = seconds_as_str_to_duration, default_value = "0")]
    pub duration: Duration,

    /// The path to the log file
    #[arg(long = "log", default_value = "data.sqlite")]
    pub log_file: String,

    /// The table name in the log file to record to (default: derived from
    /// the benchmark start time)
    #[arg(long = "logtable", default_value = "")]
    pub log_table: String,

    /// A note to include in the meta table entry for this run
    #[arg(long = "note", default_value = "")]
    pub note: String,

    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub rate_control: RateControlConfig,

    /// Port of the monitoring UI
    #[arg(long = "httpport", default_value_t = 8005)]
    pub http_port: u16,
}

impl BenchmarkConfig {
    /// Checks the flag combinations and fills in the derived defaults.
    /// Failures here abort the benchmark before any worker starts.
    pub fn validate_and_set_defaults(&mut self) -> anyhow::Result<()> {
        if self.bench == self.load {
            bail!("must specify exactly one of --bench or --load");
        }

        if self.database.host.is_empty() && !self.database.no_connection {
            bail!("must specify --host");
        }

        if self.log_file.is_empty() {
            bail!("must specify a log file path");
        }

        if self.database.connection_multiplier != 1 && self.rate_control.concurrency == 0 {
            bail!("must specify --concurrency if --connectionmultiplier is specified");
        }

        if self.rate_control.event_rate == 0.0 {
            self.rate_control.event_rate = 1000.0;
        }

        if self.rate_control.max_event_rate_per_worker == 0.0 {
            self.rate_control.max_event_rate_per_worker = 100.0;
        }

        if self.rate_control.outer_loop_rate == 0.0 {
            self.rate_control.outer_loop_rate = 50.0;
        }

        if self.rate_control.concurrency == 0 {
            self.rate_control.concurrency = (self.rate_control.event_rate
                / self.rate_control.max_event_rate_per_worker)
                .ceil() as usize;
        }

        // No worker may average less than one event per second.
        let max_concurrency = self.rate_control.event_rate.ceil() as usize;
        if self.rate_control.concurrency > max_concurrency {
            self.rate_control.concurrency = max_concurrency;
            warn!(
                concurrency = self.rate_control.concurrency,
                "concurrency is too high for the given event rate, reducing"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> BenchmarkConfig {
        BenchmarkConfig::parse_from(std::iter::once("bench").chain(args.iter().copied()))
    }

    #[test]
    fn bench_and_load_are_mutually_exclusive() {
        let mut config = parse(&["--bench", "--load", "--host", "db"]);
        assert!(config.validate_and_set_defaults().is_err());

        let mut config = parse(&["--host", "db"]);
        assert!(config.validate_and_set_defaults().is_err());

        let mut config = parse(&["--bench", "--host", "db"]);
        config.validate_and_set_defaults().unwrap();
    }

    #[test]
    fn host_is_required_unless_connectionless() {
        let mut config = parse(&["--bench"]);
        assert!(config.validate_and_set_defaults().is_err());

        let mut config = parse(&["--bench"]);
        config.database.no_connection = true;
        config.validate_and_set_defaults().unwrap();
    }

    #[test]
    fn concurrency_is_derived_from_worker_max_rate() {
        let mut config = parse(&[
            "--bench",
            "--host",
            "db",
            "--eventrate",
            "1050",
            "--workermaxrate",
            "100",
        ]);
        config.validate_and_set_defaults().unwrap();
        assert_eq!(config.rate_control.concurrency, 11);
    }

    #[test]
    fn concurrency_is_clamped_to_event_rate() {
        let mut config = parse(&[
            "--bench",
            "--host",
            "db",
            "--eventrate",
            "10",
            "--concurrency",
            "50",
        ]);
        config.validate_and_set_defaults().unwrap();
        assert_eq!(config.rate_control.concurrency, 10);
    }

    #[test]
    fn scaling_rounds_concurrency_up() {
        let rc = RateControlConfig {
            event_rate: 1000.0,
            concurrency: 10,
            ..Default::default()
        };

        let scaled = rc.scaled(0.25);
        assert_eq!(scaled.concurrency, 3);
        assert_eq!(scaled.event_rate, 250.0);
    }

    #[test]
    fn scaling_keeps_at_least_one_event_per_second_per_worker() {
        let rc = RateControlConfig {
            event_rate: 100.0,
            concurrency: 80,
            ..Default::default()
        };

        let scaled = rc.scaled(0.01);
        assert_eq!(scaled.event_rate, 1.0);
        assert_eq!(scaled.concurrency, 1);
    }
}
