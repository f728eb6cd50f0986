//! Timing behavior of the discretized looper, under light load and under
//! heavy overload.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mysql_loadgen::looper::{DiscretizedLooper, LooperEvents, LooperType, OuterLoopStat};
use mysql_loadgen::shutdown;

struct RecordingEvents {
    event_cost: Duration,
    stats: Vec<OuterLoopStat>,
}

impl RecordingEvents {
    fn new(event_cost: Duration) -> Self {
        Self {
            event_cost,
            stats: Vec::with_capacity(4096),
        }
    }
}

#[async_trait]
impl LooperEvents for RecordingEvents {
    async fn event(&mut self) -> Result<()> {
        if !self.event_cost.is_zero() {
            tokio::time::sleep(self.event_cost).await;
        }
        Ok(())
    }

    fn trace_outer_loop(&mut self, stat: &OuterLoopStat) {
        self.stats.push(*stat);
    }
}

async fn run_looper_for(looper: DiscretizedLooper, events: &mut RecordingEvents, d: Duration) {
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    tokio::select! {
        res = looper.run(events, shutdown_rx) => res.unwrap(),
        _ = tokio::time::sleep(d) => {}
    }

    drop(shutdown_tx);
}

#[tokio::test(flavor = "multi_thread")]
async fn uniform_looper_hits_the_target_rate() {
    let looper = DiscretizedLooper {
        event_rate: 200.0,
        outer_loop_rate: 50.0,
        looper_type: LooperType::Uniform,
    };

    let mut events = RecordingEvents::new(Duration::ZERO);
    let start = std::time::Instant::now();
    run_looper_for(looper, &mut events, Duration::from_secs(5)).await;
    let elapsed = start.elapsed().as_secs_f64();

    let total = events.stats.last().unwrap().cumulative_events;
    let expected = looper.event_rate * elapsed;
    let diff_pct = ((total as f64 - expected) / expected).abs() * 100.0;
    assert!(
        diff_pct <= 5.0,
        "ran {total} events, which deviates {diff_pct:.2}% from the expected {expected:.0}"
    );

    // The event rate is an integer multiple of the outer loop rate, so there
    // is no discretization remainder and every window holds the same batch. A
    // severely late wakeup can push one window into catch-up mode, so allow a
    // couple of outliers for scheduling noise.
    let odd_batches = events
        .stats
        .iter()
        .filter(|s| s.event_batch_size != 4)
        .count();
    assert!(
        odd_batches <= 2,
        "{odd_batches} of {} windows had a batch size other than 4",
        events.stats.len()
    );

    // No window should sleep past the outer loop period.
    let long_gaps = events
        .stats
        .windows(2)
        .filter(|pair| {
            pair[1].actual_wakeup_time - pair[0].actual_wakeup_time > Duration::from_millis(40)
        })
        .count();
    assert!(
        long_gaps <= 2,
        "{long_gaps} of {} wakeup gaps exceeded twice the outer loop period",
        events.stats.len()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn overloaded_looper_degenerates_to_batches_of_one() {
    // 200 events/s requested, but each event takes 50 ms: the looper cannot
    // keep up and should degenerate into back-to-back single-event windows,
    // yielding the ~20 events/s the event cost allows.
    let looper = DiscretizedLooper {
        event_rate: 200.0,
        outer_loop_rate: 50.0,
        looper_type: LooperType::Uniform,
    };

    let mut events = RecordingEvents::new(Duration::from_millis(50));
    run_looper_for(looper, &mut events, Duration::from_secs(5)).await;

    let total = events.stats.last().unwrap().cumulative_events;
    assert!(
        (80..=110).contains(&total),
        "expected roughly 100 events at the 20 events/s the event cost allows, ran {total}"
    );

    // The first window is sized assuming no back pressure; every subsequent
    // one must fall back to a single event.
    assert_eq!(events.stats[0].event_batch_size, 4);
    for stat in &events.stats[1..] {
        assert_eq!(stat.event_batch_size, 1);
    }

    // Once behind, the loop must not sleep between windows.
    let slept = events
        .stats
        .windows(2)
        .filter(|pair| {
            pair[1].actual_wakeup_time - pair[0].events_end > Duration::from_millis(5)
        })
        .count();
    assert!(
        slept <= 2,
        "the loop slept between {slept} of {} consecutive overloaded windows",
        events.stats.len()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn event_errors_abort_the_loop() {
    struct FailingEvents {
        calls: u64,
    }

    #[async_trait]
    impl LooperEvents for FailingEvents {
        async fn event(&mut self) -> Result<()> {
            self.calls += 1;
            anyhow::bail!("synthetic event failure")
        }
    }

    let looper = DiscretizedLooper {
        event_rate: 100.0,
        outer_loop_rate: 50.0,
        looper_type: LooperType::Uniform,
    };

    let (_shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut events = FailingEvents { calls: 0 };

    let err = looper
        .run(&mut events, shutdown_rx)
        .await
        .expect_err("the loop should abort on the first event error");
    assert!(err.to_string().contains("synthetic event failure"));
    assert_eq!(events.calls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_the_loop() {
    let looper = DiscretizedLooper {
        event_rate: 100.0,
        outer_loop_rate: 50.0,
        looper_type: LooperType::Poisson,
    };

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut events = RecordingEvents::new(Duration::ZERO);

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                shutdown_tx.shutdown().await;
            },
            looper.run(&mut events, shutdown_rx),
        )
    })
    .await;

    assert!(stopped.is_ok(), "the looper did not react to cancellation");
}
