//! Types for gracefully shutting down the background tasks of a benchmark.
//!
//! A benchmark uses two independent channels: one covering every workload's
//! workers and one covering the data collector. Stopping the workloads first
//! and the collector second lets the collector observe the final state of the
//! workers' histograms before they are torn down.

use tokio::sync::watch;

/// Creates a new shutdown channel, returning a [`ShutdownSender`] and a
/// [`ShutdownReceiver`].
pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    (ShutdownSender(shutdown_tx), ShutdownReceiver(shutdown_rx))
}

/// Broadcasts a shutdown signal to all of the associated
/// [`ShutdownReceiver`]s.
#[derive(Debug)]
pub struct ShutdownSender(watch::Sender<()>);

impl ShutdownSender {
    /// Broadcast a shutdown signal to every receiver associated with this
    /// sender and wait until all of them have been dropped.
    pub async fn shutdown(self) {
        // The only situation in which this send can fail is if every receiver
        // has already been closed, which is exactly what we want
        let _ = self.0.send(());
        self.0.closed().await;
    }
}

/// Waits for a shutdown signal from a [`ShutdownSender`]. A
/// [`ShutdownReceiver`] can be cloned and handed to subtasks; clones are
/// associated with the same sender as the original.
#[derive(Clone, Debug)]
pub struct ShutdownReceiver(watch::Receiver<()>);

impl ShutdownReceiver {
    /// Asynchronously wait for a shutdown signal. Intended to be used inside
    /// a [`tokio::select!`], racing against the task's actual work.
    pub async fn recv(&mut self) {
        let _ = self.0.changed().await;
    }

    /// Non-blocking check for a shutdown signal, for hot loops that cannot
    /// afford to await between iterations. A dropped sender counts as a
    /// shutdown.
    pub fn signal_received(&self) -> bool {
        self.0.has_changed().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = channel();
        assert!(!shutdown_rx.signal_received());

        let background_task = tokio::spawn(async move {
            shutdown_rx.recv().await;
            assert!(shutdown_rx.signal_received());
        });

        shutdown_tx.shutdown().await;
        background_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (shutdown_tx, shutdown_rx) = channel();
        drop(shutdown_tx);
        assert!(shutdown_rx.signal_received());
    }
}
