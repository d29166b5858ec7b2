// THEORY:
// The `TickLoop` is the single-threaded driver that turns a stream of blob
// updates into a stream of tick reports. It owns the `TrackerRegistry` outright;
// nothing else touches tracker state while it runs.
//
// Key architectural principles:
// 1.  **Poll, Then Tick**: Each iteration drains incoming updates for at most one
//     poll timeout, then runs exactly one registry tick. A quiet input therefore
//     still produces a tick every poll timeout, which is what lets idle blobs age
//     out.
// 2.  **Loop-Stamped Time**: Updates carry no clock. Each one is stamped with the
//     loop's elapsed time when it is received, and ticks use the same clock.
// 3.  **Cooperative Shutdown**: The loop ends when the stop flag is raised, when the
//     update channel closes, or when nobody listens for reports anymore. In every
//     case the current tick is completed first and the registry is handed back.

use crate::core_modules::timed_sample::BlobUpdate;
use crate::registry::{TickReport, TrackerRegistry};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

pub struct TickLoop {
    registry: TrackerRegistry,
    updates: mpsc::UnboundedReceiver<BlobUpdate>,
    reports: mpsc::UnboundedSender<TickReport>,
    /// Raised (set to `true`) to request shutdown.
    stop: watch::Receiver<bool>,
    poll_timeout: Duration,
    started: Instant,
}

impl TickLoop {
    pub fn new(
        registry: TrackerRegistry,
        updates: mpsc::UnboundedReceiver<BlobUpdate>,
        reports: mpsc::UnboundedSender<TickReport>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let poll_timeout = registry.config().poll_timeout();
        Self {
            registry,
            updates,
            reports,
            stop,
            poll_timeout,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Drains updates until the poll deadline. Returns `false` once the update
    /// channel has closed.
    async fn poll(&mut self) -> bool {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            match timeout_at(deadline, self.updates.recv()).await {
                Ok(Some(update)) => {
                    let now = self.elapsed();
                    self.registry.on_update(&update, now);
                }
                Ok(None) => return false,
                Err(_) => return true,
            }
        }
    }

    pub async fn run(mut self) -> TrackerRegistry {
        info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            reference_paths = self.registry.references().len(),
            "tick loop started"
        );
        let mut ticks: u64 = 0;

        loop {
            let input_open = self.poll().await;
            let report = self.registry.tick(self.elapsed());
            ticks += 1;
            debug!(
                tick = ticks,
                blobs = self.registry.len(),
                results = report.results.len(),
                expired = report.expired.len(),
                "tick"
            );

            if self.reports.send(report).is_err() {
                warn!("report receiver dropped, stopping");
                break;
            }
            if !input_open {
                info!("update channel closed");
                break;
            }
            if *self.stop.borrow() {
                info!("stop requested");
                break;
            }
        }

        info!(ticks, blobs = self.registry.len(), "tick loop stopped");
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::registry::TrackingResult;

    fn channels() -> (
        mpsc::UnboundedSender<BlobUpdate>,
        mpsc::UnboundedReceiver<BlobUpdate>,
        mpsc::UnboundedSender<TickReport>,
        mpsc::UnboundedReceiver<TickReport>,
    ) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        (update_tx, update_rx, report_tx, report_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn straight_run_is_reported_as_a_line() {
        let registry = TrackerRegistry::new(TrackerConfig::default(), Vec::new()).unwrap();
        let (update_tx, update_rx, report_tx, mut report_rx) = channels();
        let (_stop_tx, stop_rx) = watch::channel(false);

        for i in 0..25 {
            let v = 100.0 + 10.0 * i as f64;
            update_tx.send(BlobUpdate { blob_id: 7, x: v, y: v }).unwrap();
        }
        drop(update_tx);

        let registry = TickLoop::new(registry, update_rx, report_tx, stop_rx).run().await;
        assert!(registry.contains(7));

        let report = report_rx.recv().await.unwrap();
        let line = report
            .results
            .iter()
            .find_map(|result| match result {
                TrackingResult::Line { line, .. } => Some(*line),
                _ => None,
            })
            .unwrap();
        assert!((line.slope - 1.0).abs() < 1e-9);
        assert!(line.intercept.abs() < 1e-6);
        assert!(report_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flag_ends_the_loop_after_the_current_tick() {
        let registry = TrackerRegistry::new(TrackerConfig::default(), Vec::new()).unwrap();
        let (_update_tx, update_rx, report_tx, mut report_rx) = channels();
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let registry = TickLoop::new(registry, update_rx, report_tx, stop_rx).run().await;
        assert!(registry.is_empty());

        let report = report_rx.recv().await.unwrap();
        assert!(report.results.is_empty());
        assert!(report_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_input_still_ticks_every_poll_timeout() {
        let registry = TrackerRegistry::new(TrackerConfig::default(), Vec::new()).unwrap();
        let (update_tx, update_rx, report_tx, mut report_rx) = channels();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(TickLoop::new(registry, update_rx, report_tx, stop_rx).run());
        update_tx.send(BlobUpdate { blob_id: 1, x: 10.0, y: 10.0 }).unwrap();

        let first = report_rx.recv().await.unwrap();
        let second = report_rx.recv().await.unwrap();
        let gap = second.timestamp - first.timestamp;
        assert!((gap - 0.033).abs() < 1e-3);

        stop_tx.send(true).unwrap();
        let registry = handle.await.unwrap();
        assert!(registry.contains(1));
    }
}
