//! Progress sink that turns batch callbacks into job status percentages.
//!
//! The sink runs on the trainer's blocking thread and only publishes the
//! latest percentage on a `watch` channel; the dispatcher task owns the
//! database writes, so each job has exactly one status writer.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use trainq_core::training::ProgressSink;
use trainq_core::types::STATUS_COMPLETE;

/// Default minimum spacing between published progress values.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Percentage of a run that is done.
///
/// `100 * (samples_this_epoch / samples_per_epoch + epochs_finished) / total_epochs`,
/// clamped to `[0, 100]`. Degenerate totals count as no progress.
pub fn progress_percent(
    samples_this_epoch: u64,
    samples_per_epoch: u64,
    epochs_finished: u64,
    total_epochs: u64,
) -> f64 {
    if total_epochs == 0 {
        return 0.0;
    }
    let epoch_fraction = if samples_per_epoch == 0 {
        0.0
    } else {
        samples_this_epoch as f64 / samples_per_epoch as f64
    };
    let percent = 100.0 * (epoch_fraction + epochs_finished as f64) / total_epochs as f64;
    percent.clamp(0.0, STATUS_COMPLETE)
}

/// [`ProgressSink`] publishing throttled percentages for one job.
pub struct StatusReporter {
    tx: watch::Sender<f64>,
    samples_per_epoch: u64,
    total_epochs: u64,
    epochs_finished: u64,
    samples_this_epoch: u64,
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl StatusReporter {
    pub fn new(
        tx: watch::Sender<f64>,
        samples_per_epoch: u64,
        total_epochs: u64,
        min_interval: Duration,
    ) -> Self {
        Self {
            tx,
            samples_per_epoch,
            total_epochs,
            epochs_finished: 0,
            samples_this_epoch: 0,
            min_interval,
            last_sent: None,
        }
    }

    fn current_percent(&self) -> f64 {
        progress_percent(
            self.samples_this_epoch,
            self.samples_per_epoch,
            self.epochs_finished,
            self.total_epochs,
        )
    }
}

impl ProgressSink for StatusReporter {
    fn on_epoch_begin(&mut self, _epoch: u64) {
        self.samples_this_epoch = 0;
    }

    fn on_batch_end(&mut self, batch_samples: u64) {
        self.samples_this_epoch += batch_samples;

        let now = Instant::now();
        let due = self
            .last_sent
            .is_none_or(|last| now.duration_since(last) >= self.min_interval);
        if due {
            // The receiver is gone only once the dispatcher stopped listening.
            let _ = self.tx.send(self.current_percent());
            self.last_sent = Some(now);
        }
    }

    fn on_epoch_end(&mut self, _epoch: u64) {
        self.epochs_finished += 1;
    }
}
