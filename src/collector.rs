//! The data collector: on a fixed cadence, swap every worker's histogram,
//! merge per workload and globally, publish a snapshot to the in-memory ring,
//! and append one row per workload to the SQLite log file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::histogram::{ExtendedHdrHistogram, IntervalData};
use crate::ring::Ring;
use crate::shutdown::ShutdownReceiver;
use crate::workload::AbstractWorkload;

/// Bounds of the all-workloads visualization histogram. Per-workload rows use
/// each workload's own configured bounds instead.
const OVERALL_HIST_MIN: i64 = 1;
const OVERALL_HIST_MAX: i64 = 300_000;
const OVERALL_HIST_SIZE: i64 = 1000;

const CREATE_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS meta (
    table_name TEXT PRIMARY KEY,
    benchmark_name TEXT,
    version TEXT,
    note TEXT,
    start_time TEXT,
    end_time TEXT
)";

const INSERT_META: &str = "
INSERT INTO meta (table_name, note, benchmark_name, version, start_time) VALUES (?1, ?2, ?3, ?4, ?5)";

const UPDATE_META_END_TIME: &str = "UPDATE meta SET end_time = ?1 WHERE table_name = ?2";

/// All statistics collected for a single workload over one interval.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkloadDataSnapshot {
    /// Observed throughput and latency data.
    #[serde(flatten)]
    pub interval_data: IntervalData,

    /// The throughput the workload was configured to reach.
    pub desired_rate: f64,
}

/// One interval's worth of merged statistics, published once per collector
/// tick.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataSnapshot {
    /// Seconds since the start of the benchmark.
    pub time: f64,

    /// Data for all monitored workloads merged together.
    pub all_workload_data: WorkloadDataSnapshot,

    /// Data for the individual workloads, indexed by workload name.
    pub per_workload_data: HashMap<String, WorkloadDataSnapshot>,
}

/// The periodic collection task. Owns the SQLite log file for the duration of
/// the run and publishes every snapshot onto the shared ring.
pub struct DataLogger {
    pub interval: Duration,
    pub output_filename: String,
    pub table_name: String,
    pub note: String,
    pub benchmark_name: String,

    workloads: Vec<Arc<dyn AbstractWorkload>>,
    ring: Arc<Ring<Arc<DataSnapshot>>>,
}

impl DataLogger {
    pub fn new(
        interval: Duration,
        output_filename: String,
        table_name: String,
        note: String,
        benchmark_name: String,
        workloads: Vec<Arc<dyn AbstractWorkload>>,
        ring: Arc<Ring<Arc<DataSnapshot>>>,
    ) -> Result<Self> {
        if output_filename.is_empty() {
            bail!("must specify an output filename for the data logger");
        }

        Ok(Self {
            interval,
            output_filename,
            table_name,
            note,
            benchmark_name,
            workloads,
            ring,
        })
    }

    /// Runs collection ticks until `shutdown` fires. A tick that is already
    /// in flight when the signal arrives completes normally; whatever the
    /// workers record after the final swap is intentionally lost, as worker
    /// teardown smears rate calculations anyway.
    pub async fn run(
        mut self,
        mut shutdown: ShutdownReceiver,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        if self.table_name.is_empty() {
            // The table name must start with a letter, hence the T prefix.
            self.table_name = format!(
                "T{}",
                start_time
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
                    .replace([':', '-'], "_")
            );
        }

        let db = tokio::task::block_in_place(|| self.initialize_log_database(start_time))?;
        info!(
            file = %self.output_filename,
            table = %self.table_name,
            "logging benchmark data"
        );

        let mut next_wakeup_time = tokio::time::Instant::now() + self.interval;
        loop {
            if next_wakeup_time <= tokio::time::Instant::now() {
                warn!(
                    "data logger is not keeping up; check whether collection is taking \
                     longer than the logging interval and increase the interval"
                );
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep_until(next_wakeup_time) => {
                    self.collect_and_log_data(&db, start_time)?;
                }
            }

            next_wakeup_time += self.interval;
        }

        tokio::task::block_in_place(|| self.close_log_database(&db))
    }

    fn initialize_log_database(&self, start_time: DateTime<Utc>) -> Result<rusqlite::Connection> {
        let mut db = rusqlite::Connection::open(&self.output_filename)
            .with_context(|| format!("opening log database {}", self.output_filename))?;

        let tx = db.transaction()?;
        tx.execute(CREATE_META_TABLE, [])?;
        tx.execute_batch(&format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workload TEXT,
                seconds_since_start REAL,
                interval_start TEXT,
                interval_end TEXT,
                desired_rate REAL,
                count INTEGER,
                delta REAL,
                rate REAL,
                min INTEGER,
                mean REAL,
                max INTEGER,
                underflow_count INTEGER,
                overflow_count INTEGER,
                percentile25 INTEGER,
                percentile50 INTEGER,
                percentile75 INTEGER,
                percentile90 INTEGER,
                percentile99 INTEGER
            );
            CREATE INDEX {table}_workload ON {table}(workload);",
            table = self.table_name
        ))?;
        tx.execute(
            INSERT_META,
            params![
                self.table_name,
                self.note,
                self.benchmark_name,
                env!("CARGO_PKG_VERSION"),
                start_time.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(db)
    }

    fn close_log_database(&self, db: &rusqlite::Connection) -> Result<()> {
        db.execute(
            UPDATE_META_END_TIME,
            params![Utc::now().to_rfc3339(), self.table_name],
        )?;
        Ok(())
    }

    fn collect_and_log_data(
        &self,
        db: &rusqlite::Connection,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = self.collect_data(start_time);
        self.log_data(db, snapshot)
    }

    /// Swaps and merges every worker's histogram into one snapshot.
    ///
    /// The swap pass must be fast: from the moment the first worker's
    /// histogram is swapped to the moment the last one is, any events still
    /// being recorded smear the rate calculation across the interval
    /// boundary, so nothing heavier than the buffer flip happens inside it.
    /// Merging, which walks every bucket, runs afterwards against the
    /// swapped-out buffers, which no worker writes to anymore. The timestamps
    /// are all derived from the single `now` captured before the swap.
    fn collect_data(&self, start_time: DateTime<Utc>) -> DataSnapshot {
        let now = Utc::now();

        // Swap pass. The pre-swap callback starts the next interval on every
        // worker at the same instant.
        for workload in &self.workloads {
            workload.for_each_online_histogram(&mut |_, online_hist| {
                online_hist.swap(|inactive| inactive.reset_start_time(now));
            });
        }

        // Merge pass, against the swapped-out buffers.
        let mut per_workload_data = HashMap::new();
        let mut all_merged: Option<ExtendedHdrHistogram> = None;
        let mut desired_rate_all = 0.0;

        for workload in &self.workloads {
            let config = workload.config();
            let rate_control = workload.rate_control_config();

            let mut merged: Option<ExtendedHdrHistogram> = None;
            workload.for_each_online_histogram(&mut |_, online_hist| {
                online_hist.with_inactive(|hist| {
                    merged
                        .get_or_insert_with(|| ExtendedHdrHistogram::new(hist.start_time()))
                        .merge(hist);
                });
            });
            let merged = merged.unwrap_or_else(|| ExtendedHdrHistogram::new(now));

            per_workload_data.insert(
                config.name.clone(),
                WorkloadDataSnapshot {
                    interval_data: merged.interval_data(
                        now,
                        config.visualization.latency_hist_min,
                        config.visualization.latency_hist_max,
                        config.visualization.latency_hist_size,
                    ),
                    desired_rate: rate_control.event_rate,
                },
            );
            desired_rate_all += rate_control.event_rate;

            all_merged
                .get_or_insert_with(|| ExtendedHdrHistogram::new(merged.start_time()))
                .merge(&merged);
        }

        let all_merged = all_merged.unwrap_or_else(|| ExtendedHdrHistogram::new(now));
        let snapshot = DataSnapshot {
            time: (now - start_time).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6,
            all_workload_data: WorkloadDataSnapshot {
                interval_data: all_merged.interval_data(
                    now,
                    OVERALL_HIST_MIN,
                    OVERALL_HIST_MAX,
                    OVERALL_HIST_SIZE,
                ),
                desired_rate: desired_rate_all,
            },
            per_workload_data,
        };

        // Reset pass, so the buffers can be swapped in again next tick. The
        // start times were already set to `now` by the pre-swap callback.
        for workload in &self.workloads {
            workload.for_each_online_histogram(&mut |_, online_hist| {
                online_hist.with_inactive(|hist| hist.reset_data_only());
            });
        }

        snapshot
    }

    /// Publishes the snapshot to the ring and appends it to the log file. A
    /// failed write is fatal: the benchmark exists to produce this data.
    fn log_data(&self, db: &rusqlite::Connection, snapshot: DataSnapshot) -> Result<()> {
        let snapshot = Arc::new(snapshot);
        self.ring.push(Arc::clone(&snapshot));

        tokio::task::block_in_place(|| {
            self.write_row(db, "__all__", snapshot.time, &snapshot.all_workload_data)?;
            for (name, workload_snapshot) in &snapshot.per_workload_data {
                self.write_row(db, name, snapshot.time, workload_snapshot)?;
            }
            Ok(())
        })
    }

    fn write_row(
        &self,
        db: &rusqlite::Connection,
        workload: &str,
        seconds_since_start: f64,
        snapshot: &WorkloadDataSnapshot,
    ) -> Result<()> {
        let data = &snapshot.interval_data;
        debug!(workload, count = data.count, rate = data.rate, "logging interval");

        db.execute(
            &format!(
                "INSERT INTO {} (
                    workload, seconds_since_start, interval_start, interval_end,
                    desired_rate, count, delta, rate, min, mean, max,
                    underflow_count, overflow_count,
                    percentile25, percentile50, percentile75, percentile90, percentile99
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                self.table_name
            ),
            params![
                workload,
                seconds_since_start,
                data.start_time.to_rfc3339(),
                data.end_time.to_rfc3339(),
                snapshot.desired_rate,
                data.count as i64,
                data.delta,
                data.rate,
                data.min as i64,
                data.mean,
                data.max as i64,
                data.underflow_count as i64,
                data.overflow_count as i64,
                data.percentile25 as i64,
                data.percentile50 as i64,
                data.percentile75 as i64,
                data.percentile90 as i64,
                data.percentile99 as i64,
            ],
        )
        .with_context(|| format!("writing interval data for workload {workload}"))?;

        Ok(())
    }
}
