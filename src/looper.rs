//! The discretized, rate-controlled event loop at the heart of every worker.
//!
//! A naive loop that runs one event and then sleeps for `1 / event_rate`
//! cannot sustain rates above ~100 Hz: neither tokio's timer nor a
//! non-realtime kernel will reliably honor sub-10 ms sleeps. Instead, an
//! outer loop runs at a modest rate (50 Hz by default) and each iteration
//! runs a batch of events back to back, sized so the average rate matches
//! `event_rate` while the simulated arrival instants follow the configured
//! arrival process. Time is effectively discretized into outer-loop windows.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::shutdown::ShutdownReceiver;

/// The arrival process shaping inter-event delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LooperType {
    /// A constant inter-arrival of `1 / event_rate`.
    #[default]
    Uniform,
    /// Exponentially distributed inter-arrivals with mean `1 / event_rate`,
    /// yielding a Poisson arrival process.
    Poisson,
}

/// Timing data for one outer-loop iteration, passed to
/// [`LooperEvents::trace_outer_loop`].
#[derive(Clone, Copy, Debug)]
pub struct OuterLoopStat {
    /// The wakeup time this iteration aimed for.
    pub desired_wakeup_time: Instant,

    /// When the iteration actually started.
    pub actual_wakeup_time: Instant,

    /// Number of events run in this iteration.
    pub event_batch_size: u64,

    /// When the last event of the batch finished.
    pub events_end: Instant,

    /// Total time spent running the batch, including the trace_event calls.
    pub events_latency: Duration,

    /// The next desired wakeup time.
    pub next_desired_wakeup_time: Instant,

    /// The next event's simulated activation time. If this falls far behind
    /// the actual wakeup time, the loop is heavily backlogged.
    pub next_expected_event_time: Instant,

    /// Cumulative number of events executed since the loop started.
    pub cumulative_events: u64,
}

/// The callbacks driven by [`DiscretizedLooper::run`]. `event` runs one
/// benchmark event; the trace callbacks are fire and forget.
#[async_trait]
pub trait LooperEvents: Send {
    async fn event(&mut self) -> Result<()>;

    fn trace_event(&mut self, _latency: Duration) {}

    fn trace_outer_loop(&mut self, _stat: &OuterLoopStat) {}
}

/// The rate-controlling loop configuration. `run` emits events through a
/// [`LooperEvents`] at an average of `event_rate` per second.
#[derive(Clone, Copy, Debug)]
pub struct DiscretizedLooper {
    /// Target event rate for this loop, in Hz.
    pub event_rate: f64,

    /// Rate of the outer loop batching the events, in Hz.
    pub outer_loop_rate: f64,

    pub looper_type: LooperType,
}

impl DiscretizedLooper {
    /// Runs the loop until `shutdown` fires or `event` returns an error. The
    /// error aborts the loop and is returned as is.
    pub async fn run<E: LooperEvents>(
        &self,
        events: &mut E,
        mut shutdown: ShutdownReceiver,
    ) -> Result<()> {
        let outer_loop_period = Duration::from_secs_f64(1.0 / self.outer_loop_rate);
        let mut rng = SmallRng::from_entropy();

        let start_time = Instant::now();
        let mut next_expected_event_time = start_time;
        let mut next_wakeup_time = start_time;
        let mut cumulative_events = 0u64;

        loop {
            if shutdown.signal_received() {
                return Ok(());
            }

            let last_wakeup_time = next_wakeup_time;
            let actual_wakeup_time = Instant::now();

            // Each outer-loop window holds enough time for the event to
            // activate N times; this computes N by advancing the simulated
            // arrival process until it crosses the end of the window.
            next_wakeup_time += outer_loop_period;
            let event_batch_size = if actual_wakeup_time >= next_wakeup_time {
                // The loop is behind: the window we are scheduling already
                // ended. Run one event per iteration as fast as possible
                // until caught up (which may be never). The next wakeup time
                // becomes the next event time, which should be in the past,
                // so the tail of the loop will not sleep (unless a Poisson
                // sample lands far in the future).
                next_wakeup_time = next_expected_event_time;
                next_expected_event_time += self.inter_arrival_duration(&mut rng);
                1
            } else if next_expected_event_time >= next_wakeup_time {
                // The next event activates in a later window; skip this one.
                0
            } else {
                let mut batch = 0u64;
                while next_expected_event_time < next_wakeup_time {
                    next_expected_event_time += self.inter_arrival_duration(&mut rng);
                    batch += 1;
                }
                batch
            };

            for _ in 0..event_batch_size {
                let event_start = Instant::now();
                events.event().await?;
                events.trace_event(event_start.elapsed());
            }
            cumulative_events += event_batch_size;
            let events_end = Instant::now();

            events.trace_outer_loop(&OuterLoopStat {
                desired_wakeup_time: last_wakeup_time,
                actual_wakeup_time,
                event_batch_size,
                events_end,
                events_latency: events_end - actual_wakeup_time,
                next_desired_wakeup_time: next_wakeup_time,
                next_expected_event_time,
                cumulative_events,
            });

            let now = Instant::now();
            if next_wakeup_time > now {
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    _ = tokio::time::sleep_until(next_wakeup_time) => {}
                }
            }
        }
    }

    fn inter_arrival_duration(&self, rng: &mut SmallRng) -> Duration {
        match self.looper_type {
            LooperType::Uniform => Duration::from_secs_f64(1.0 / self.event_rate),
            LooperType::Poisson => {
                let u: f64 = rng.gen();
                Duration::from_secs_f64(-(1.0 - u).ln() / self.event_rate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisson_inter_arrival_mean_matches_event_rate() {
        let looper = DiscretizedLooper {
            event_rate: 200.0,
            outer_loop_rate: 50.0,
            looper_type: LooperType::Poisson,
        };

        let mut rng = SmallRng::from_entropy();
        const N: usize = 200_000;
        let total: f64 = (0..N)
            .map(|_| looper.inter_arrival_duration(&mut rng).as_secs_f64())
            .sum();
        let mean = total / N as f64;

        let expected = 1.0 / looper.event_rate;
        let diff_pct = ((mean - expected) / expected).abs() * 100.0;
        assert!(
            diff_pct <= 5.0,
            "sample mean {mean} deviates {diff_pct:.2}% from {expected}"
        );
    }

    #[test]
    fn uniform_inter_arrival_is_constant() {
        let looper = DiscretizedLooper {
            event_rate: 200.0,
            outer_loop_rate: 50.0,
            looper_type: LooperType::Uniform,
        };

        let mut rng = SmallRng::from_entropy();
        for _ in 0..100 {
            assert_eq!(
                looper.inter_arrival_duration(&mut rng),
                Duration::from_millis(5)
            );
        }
    }
}
