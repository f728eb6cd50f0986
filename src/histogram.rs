//! Latency accumulation: an HDR histogram extended with under/overflow
//! tracking and a start time, a fixed-width histogram for visualization, and
//! the double-buffered online histogram the workers write into.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;

/// Lowest trackable latency, in microseconds.
const LOWEST_TRACKABLE_VALUE: u64 = 1;
/// Highest trackable latency, in microseconds (10 s).
const HIGHEST_TRACKABLE_VALUE: u64 = 10_000_000;
const SIGNIFICANT_FIGURES: u8 = 4;

/// Throughput and latency statistics for one collection interval. All latency
/// values are in microseconds.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntervalData {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub count: u64,
    /// Interval length in seconds.
    pub delta: f64,
    /// Events per second over the interval.
    pub rate: f64,

    pub min: u64,
    pub mean: f64,
    pub max: u64,
    pub percentile25: u64,
    pub percentile50: u64,
    pub percentile75: u64,
    pub percentile90: u64,
    pub percentile99: u64,

    pub underflow_count: u64,
    pub overflow_count: u64,

    pub uniform_hist: UniformHistogram,
}

/// An HDR histogram tracking 1 μs..10 s at four significant figures, extended
/// with the interval start time and counters for values outside the trackable
/// range. Out-of-range values bump a counter and are not recorded in the HDR
/// structure, so `hdr count + underflow + overflow` accounts for every
/// recorded value exactly once.
#[derive(Debug)]
pub struct ExtendedHdrHistogram {
    hist: Histogram<u64>,
    start_time: DateTime<Utc>,
    underflow_count: u64,
    overflow_count: u64,
}

impl ExtendedHdrHistogram {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            hist: Histogram::new_with_bounds(
                LOWEST_TRACKABLE_VALUE,
                HIGHEST_TRACKABLE_VALUE,
                SIGNIFICANT_FIGURES,
            )
            .unwrap(),
            start_time,
            underflow_count: 0,
            overflow_count: 0,
        }
    }

    pub fn record(&mut self, v: u64) {
        if v > self.hist.high() {
            self.overflow_count += 1;
            return;
        }

        if v < self.hist.low() {
            self.underflow_count += 1;
            return;
        }

        // Cannot fail: v is within the configured bounds.
        self.hist.record(v).unwrap();
    }

    /// Total number of recorded values, including out-of-range ones.
    pub fn count(&self) -> u64 {
        self.hist.len() + self.underflow_count + self.overflow_count
    }

    /// Zeroes the recorded data while preserving the start time.
    pub fn reset_data_only(&mut self) {
        self.hist.reset();
        self.underflow_count = 0;
        self.overflow_count = 0;
    }

    pub fn reset_start_time(&mut self, start_time: DateTime<Utc>) {
        self.start_time = start_time;
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Folds `other` into `self`. Only meaningful for histograms covering the
    /// same interval; merging histograms with different start times is a
    /// programmer error and panics.
    pub fn merge(&mut self, other: &ExtendedHdrHistogram) {
        if self.start_time != other.start_time {
            panic!(
                "failed to merge histograms with different start times: {} {}",
                self.start_time, other.start_time
            );
        }

        self.underflow_count += other.underflow_count;
        self.overflow_count += other.overflow_count;
        self.hist.add(&other.hist).unwrap();
    }

    /// Computes the statistics for the interval ending at `end_time`, along
    /// with a fixed-width histogram bounded by `[hist_min, hist_max]` for
    /// visualization. All statistics are zero when nothing was recorded.
    pub fn interval_data(
        &self,
        end_time: DateTime<Utc>,
        hist_min: i64,
        hist_max: i64,
        hist_size: i64,
    ) -> IntervalData {
        let count = self.count();
        let delta = duration_secs(self.start_time, end_time);

        IntervalData {
            start_time: self.start_time,
            end_time,
            count,
            delta,
            rate: count as f64 / delta,
            min: self.hist.min(),
            mean: self.hist.mean(),
            max: self.hist.max(),
            percentile25: self.hist.value_at_quantile(0.25),
            percentile50: self.hist.value_at_quantile(0.50),
            percentile75: self.hist.value_at_quantile(0.75),
            percentile90: self.hist.value_at_quantile(0.90),
            percentile99: self.hist.value_at_quantile(0.99),
            underflow_count: self.underflow_count,
            overflow_count: self.overflow_count,
            uniform_hist: self.uniform_distribution(hist_min, hist_max, hist_size),
        }
    }

    /// Approximates the HDR histogram with fixed-width buckets by recording
    /// each HDR bar's midpoint. Underflow lands in the bottom bucket and
    /// overflow in the top one.
    fn uniform_distribution(&self, hist_min: i64, hist_max: i64, hist_size: i64) -> UniformHistogram {
        let mut hist = UniformHistogram::new(hist_min, hist_max, hist_size);

        for bar in self.hist.iter_recorded() {
            let from = self.hist.lowest_equivalent(bar.value_iterated_to());
            let to = self.hist.highest_equivalent(bar.value_iterated_to());
            let mid = if from == to { from } else { (from + to) / 2 };
            hist.record_values(mid as i64, bar.count_at_value());
        }

        hist.record_values(hist_min, self.underflow_count);
        hist.record_values(hist_max, self.overflow_count);

        hist
    }
}

fn duration_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6
}

/// One fixed-width bucket of a [`UniformHistogram`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    pub from: i64,
    pub to: i64,
    pub count: u64,
}

/// A histogram with `hist_size` equal-width buckets spanning `[hist_min,
/// hist_max]`, used for data logging and the web UI. Values at or below the
/// minimum land in the first bucket; values at or above the maximum land in
/// the last.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UniformHistogram {
    pub buckets: Vec<Bucket>,

    #[serde(skip)]
    hist_min: i64,
    #[serde(skip)]
    hist_max: i64,
    #[serde(skip)]
    bucket_width: i64,
}

impl UniformHistogram {
    pub fn new(hist_min: i64, hist_max: i64, hist_size: i64) -> Self {
        let bucket_width = (((hist_max - hist_min) as f64) / hist_size as f64).round() as i64;
        if bucket_width == 0 {
            panic!(
                "uniform histogram bucket width must not be 0 (min = {hist_min}, max = {hist_max}, size = {hist_size})"
            );
        }

        let mut buckets = Vec::with_capacity(hist_size as usize + 1);
        let mut from = hist_min;
        while from <= hist_max {
            let to = from + bucket_width;
            buckets.push(Bucket { from, to, count: 0 });
            from = to;
        }

        Self {
            buckets,
            hist_min,
            hist_max,
            bucket_width,
        }
    }

    pub fn record_values(&mut self, v: i64, count: u64) {
        let i = self.idx(v);
        self.buckets[i].count += count;
    }

    fn idx(&self, v: i64) -> usize {
        if v <= self.hist_min {
            return 0;
        }

        if v >= self.hist_max {
            return self.buckets.len() - 1;
        }

        ((v - self.hist_min) / self.bucket_width) as usize
    }
}

/// A double-buffered [`ExtendedHdrHistogram`] shared between one producer (a
/// benchmark worker) and one consumer (the data collector).
///
/// The producer records into the active slot. The consumer periodically calls
/// [`swap`](Self::swap) to flip the slots, then reads and resets the now
/// inactive slot through [`with_inactive`](Self::with_inactive). The protocol
/// is:
///
/// 1. Only one thread ever calls `swap` and `with_inactive`.
/// 2. `swap` runs its `pre_swap` callback on the inactive slot (to reset its
///    start time) before publishing the flip.
/// 3. After reading the swapped-out slot the consumer must reset its data
///    (not its start time, which `pre_swap` already set) before the next
///    swap, or the next interval reports cumulative statistics.
///
/// Each slot has its own mutex and producers re-check the active index after
/// acquiring a lock, so a write can never land in a slot the consumer is
/// reading and the consumer's merge never blocks the producer.
#[derive(Debug)]
pub struct OnlineHistogram {
    bufs: [Mutex<ExtendedHdrHistogram>; 2],
    active: AtomicUsize,
}

impl OnlineHistogram {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            bufs: [
                Mutex::new(ExtendedHdrHistogram::new(start_time)),
                Mutex::new(ExtendedHdrHistogram::new(start_time)),
            ],
            active: AtomicUsize::new(0),
        }
    }

    /// Records a latency value (in microseconds) into the active slot.
    pub fn record(&self, v: u64) {
        self.safe_active_write(|hist| hist.record(v));
    }

    /// Runs `f` against the active slot. The producer path.
    pub fn safe_active_write(&self, f: impl FnOnce(&mut ExtendedHdrHistogram)) {
        let mut hist = loop {
            let idx = self.active.load(Ordering::Acquire);
            let guard = self.bufs[idx].lock().unwrap();
            if self.active.load(Ordering::Acquire) == idx {
                break guard;
            }
            // The consumer swapped while we waited on the lock; retry against
            // the new active slot.
        };

        f(&mut hist);
    }

    /// Flips the active slot after running `pre_swap` on the inactive one.
    /// The previously active slot, holding the data accumulated since the
    /// last swap, becomes readable through [`with_inactive`](Self::with_inactive).
    pub fn swap(&self, pre_swap: impl FnOnce(&mut ExtendedHdrHistogram)) {
        let inactive = 1 - self.active.load(Ordering::Acquire);

        {
            let mut hist = self.bufs[inactive].lock().unwrap();
            pre_swap(&mut hist);
        }

        self.active.store(inactive, Ordering::Release);
    }

    /// Runs `f` against the inactive slot. The consumer path, used to merge
    /// and reset the swapped-out data.
    pub fn with_inactive<R>(&self, f: impl FnOnce(&mut ExtendedHdrHistogram) -> R) -> R {
        let inactive = 1 - self.active.load(Ordering::Acquire);
        let mut hist = self.bufs[inactive].lock().unwrap();
        f(&mut hist)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn record_accounts_for_every_value() {
        let mut hist = ExtendedHdrHistogram::new(Utc::now());

        for (v, expected_under, expected_over) in
            [(100, 0, 0), (0, 1, 0), (10_000_001, 1, 1), (1, 1, 1)]
        {
            let before = hist.count();
            hist.record(v);
            assert_eq!(hist.count(), before + 1);
            assert_eq!(hist.underflow_count, expected_under);
            assert_eq!(hist.overflow_count, expected_over);
        }
    }

    #[test]
    fn reset_data_only_preserves_start_time() {
        let start = Utc::now();
        let mut hist = ExtendedHdrHistogram::new(start);
        hist.record(500);
        hist.record(0);

        hist.reset_data_only();

        assert_eq!(hist.count(), 0);
        assert_eq!(hist.start_time(), start);
    }

    #[test]
    fn merge_sums_counts() {
        let start = Utc::now();
        let mut a = ExtendedHdrHistogram::new(start);
        let mut b = ExtendedHdrHistogram::new(start);

        a.record(100);
        a.record(0);
        b.record(200);
        b.record(20_000_000);

        a.merge(&b);

        assert_eq!(a.count(), 4);
        assert_eq!(a.underflow_count, 1);
        assert_eq!(a.overflow_count, 1);
        assert_eq!(a.hist.len(), 2);
    }

    #[test]
    #[should_panic(expected = "different start times")]
    fn merge_with_mismatched_start_times_panics() {
        let start = Utc::now();
        let mut a = ExtendedHdrHistogram::new(start);
        let b = ExtendedHdrHistogram::new(start + Duration::seconds(1));
        a.merge(&b);
    }

    #[test]
    fn interval_data_computes_rates() {
        let start = Utc::now();
        let mut hist = ExtendedHdrHistogram::new(start);
        for _ in 0..100 {
            hist.record(1000);
        }

        let data = hist.interval_data(start + Duration::seconds(2), 0, 50_000, 1000);

        assert_eq!(data.count, 100);
        assert!((data.delta - 2.0).abs() < 1e-9);
        assert!((data.rate - 50.0).abs() < 1e-9);
        assert_eq!(data.percentile50, 1000);
        assert!(data.min <= 1000 && data.max >= 1000);
    }

    #[test]
    fn interval_data_tolerates_empty_histogram() {
        let start = Utc::now();
        let hist = ExtendedHdrHistogram::new(start);
        let data = hist.interval_data(start + Duration::seconds(1), 0, 50_000, 1000);

        assert_eq!(data.count, 0);
        assert_eq!(data.rate, 0.0);
        assert_eq!(data.min, 0);
        assert_eq!(data.max, 0);
    }

    #[test]
    fn uniform_histogram_clamps_out_of_range_values() {
        let mut hist = UniformHistogram::new(0, 1000, 10);
        hist.record_values(-5, 1);
        hist.record_values(0, 1);
        hist.record_values(1000, 2);
        hist.record_values(2000, 1);
        hist.record_values(550, 3);

        assert_eq!(hist.buckets[0].count, 2);
        assert_eq!(hist.buckets.last().unwrap().count, 3);
        assert_eq!(hist.buckets[5].count, 3);
    }

    #[test]
    #[should_panic(expected = "bucket width")]
    fn uniform_histogram_zero_bucket_width_panics() {
        UniformHistogram::new(0, 10, 1000);
    }

    #[test]
    fn swap_hands_over_accumulated_data() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        let online = OnlineHistogram::new(t0);

        online.record(100);
        online.record(200);
        online.record(300);

        online.swap(|inactive| inactive.reset_start_time(t1));

        online.with_inactive(|hist| {
            assert_eq!(hist.count(), 3);
            assert_eq!(hist.start_time(), t0);
            hist.reset_data_only();
        });

        // Writes now land in the slot whose start time was reset by pre_swap.
        online.record(400);
        let t2 = t1 + Duration::seconds(1);
        online.swap(|inactive| inactive.reset_start_time(t2));

        online.with_inactive(|hist| {
            assert_eq!(hist.count(), 1);
            assert_eq!(hist.start_time(), t1);
        });
    }

    #[test]
    fn concurrent_writes_survive_swaps() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let online = Arc::new(OnlineHistogram::new(Utc::now()));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let online = Arc::clone(&online);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut written = 0u64;
                while !done.load(Ordering::Relaxed) {
                    online.record(100);
                    written += 1;
                }
                written
            })
        };

        let mut collected = 0u64;
        for _ in 0..100 {
            let now = Utc::now();
            online.swap(|inactive| inactive.reset_start_time(now));
            collected += online.with_inactive(|hist| {
                let count = hist.count();
                hist.reset_data_only();
                count
            });
        }

        done.store(true, Ordering::Relaxed);
        let written = writer.join().unwrap();

        // Drain whatever landed after the last swap.
        let now = Utc::now();
        online.swap(|inactive| inactive.reset_start_time(now));
        collected += online.with_inactive(|hist| hist.count());
        online.safe_active_write(|hist| collected += hist.count());

        assert_eq!(collected, written);
    }
}
