//! Bounded, ordered, closeable progress channel.
//!
//! Stage executors and work functions push `(stage, percent, label)` updates
//! through a [`ProgressReporter`]; a single consumer drains the matching
//! [`ProgressStream`]. The channel is bounded and producers never block: a
//! full buffer drops the update, counts the drop and logs it. The stream is
//! closed exactly once per run, by the driver, after the terminal report is
//! assembled - consumers observe the close as `None`.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

/// Buffer capacity used when a pipeline does not configure one.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 64;

/// One progress update: which stage, how far along, what it is doing.
///
/// `percent` is stage-scoped - 0 to 100 within the emitting stage, not
/// across the whole run. Labels are human-readable and carry no contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Stage that emitted the update.
    pub stage: String,
    /// Stage-scoped completion percentage, 0-100.
    pub percent: u8,
    /// Human-readable description of what the stage is doing.
    pub label: String,
}

impl ProgressUpdate {
    /// Creates a progress update.
    #[must_use]
    pub fn new(stage: impl Into<String>, percent: u8, label: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            percent,
            label: label.into(),
        }
    }
}

/// Emit/drop counters for one progress channel.
#[derive(Debug, Default)]
pub struct ProgressMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl ProgressMetrics {
    fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of updates delivered into the buffer.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of updates dropped because the buffer was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sending half of the progress channel.
///
/// Cheap to clone; all clones feed the same buffer and share one metrics
/// block. Emitting is non-blocking by construction.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
    metrics: Arc<ProgressMetrics>,
}

impl ProgressReporter {
    /// Pushes an update without blocking.
    ///
    /// A full buffer drops the update (counted and logged at `warn`); a
    /// closed buffer means the consumer went away and the update is counted
    /// as dropped silently.
    pub fn emit(&self, stage: &str, percent: u8, label: impl Into<String>) {
        let update = ProgressUpdate::new(stage, percent, label);
        match self.tx.try_send(update) {
            Ok(()) => self.metrics.record_emit(),
            Err(mpsc::error::TrySendError::Full(update)) => {
                self.metrics.record_drop();
                warn!(
                    stage = %update.stage,
                    dropped_total = self.metrics.dropped(),
                    "progress update dropped: buffer full"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_drop();
            }
        }
    }

    /// The shared emit/drop counters of this channel.
    #[must_use]
    pub fn metrics(&self) -> &ProgressMetrics {
        &self.metrics
    }
}

/// Receiving half of the progress channel.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::Receiver<ProgressUpdate>,
}

impl ProgressStream {
    /// Waits for the next update; `None` once the channel is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<ProgressUpdate> {
        self.rx.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = ProgressUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a bounded progress channel.
///
/// A zero capacity is bumped to one; the underlying channel cannot be
/// unbuffered.
#[must_use]
pub fn channel(capacity: usize) -> (ProgressReporter, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressReporter {
            tx,
            metrics: Arc::new(ProgressMetrics::default()),
        },
        ProgressStream { rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_updates_arrive_in_emit_order() {
        let (reporter, mut stream) = channel(16);

        reporter.emit("parse", 0, "starting");
        reporter.emit("parse", 50, "halfway");
        reporter.emit("parse", 100, "completed");

        assert_eq!(stream.recv().await.unwrap().percent, 0);
        assert_eq!(stream.recv().await.unwrap().percent, 50);
        assert_eq!(stream.recv().await.unwrap().percent, 100);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let (reporter, mut stream) = channel(2);

        reporter.emit("score", 0, "starting");
        reporter.emit("score", 25, "first pass");
        reporter.emit("score", 50, "overflow");

        assert_eq!(reporter.metrics().emitted(), 2);
        assert_eq!(reporter.metrics().dropped(), 1);

        assert_eq!(stream.recv().await.unwrap().percent, 0);
        assert_eq!(stream.recv().await.unwrap().percent, 25);
    }

    #[tokio::test]
    async fn test_stream_ends_after_reporters_drop() {
        let (reporter, mut stream) = channel(8);
        let clone = reporter.clone();

        reporter.emit("parse", 100, "completed");
        drop(reporter);
        drop(clone);

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_after_consumer_gone_counts_drop() {
        let (reporter, stream) = channel(8);
        drop(stream);

        reporter.emit("parse", 0, "starting");

        assert_eq!(reporter.metrics().emitted(), 0);
        assert_eq!(reporter.metrics().dropped(), 1);
    }

    #[tokio::test]
    async fn test_futures_stream_collects_until_close() {
        let (reporter, stream) = channel(8);

        reporter.emit("parse", 0, "starting");
        reporter.emit("parse", 100, "completed");
        drop(reporter);

        let updates: Vec<ProgressUpdate> = stream.collect().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].label, "completed");
    }

    #[test]
    fn test_update_serializes() {
        let update = ProgressUpdate::new("summarize", 75, "rendering sections");
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["stage"], "summarize");
        assert_eq!(json["percent"], 75);
        assert_eq!(json["label"], "rendering sections");
    }
}
