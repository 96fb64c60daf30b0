//! Canned stage implementations with observable behavior.

use crate::context::StageContext;
use crate::errors::WorkError;
use crate::stages::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stage that returns a fixed value and counts its invocations.
#[derive(Debug)]
pub struct StubStage {
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl StubStage {
    /// Creates a stub returning `value` on every attempt.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle to the invocation counter, valid after the stage is moved
    /// into a pipeline.
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Stage for StubStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Stage that fails every attempt with a fixed error.
#[derive(Debug)]
pub struct FailingStage {
    error: WorkError,
    calls: Arc<AtomicUsize>,
}

impl FailingStage {
    /// Creates a stage that always fails fatally.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            error: WorkError::fatal(message),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a stage that always fails retryably.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            error: WorkError::retryable(message),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle to the invocation counter.
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Stage for FailingStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Stage that fails retryably a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    failures_before_success: usize,
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl FlakyStage {
    /// Creates a stage that fails `failures_before_success` times before
    /// returning `value`.
    #[must_use]
    pub fn new(failures_before_success: usize, value: impl Into<Value>) -> Self {
        Self {
            failures_before_success,
            value: value.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle to the invocation counter.
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Stage for FlakyStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, WorkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            Err(WorkError::retryable(format!("induced failure {}", n + 1)))
        } else {
            Ok(self.value.clone())
        }
    }
}

/// Tracks how many stages are inside their work function at once.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

impl ConcurrencyGauge {
    /// Creates a gauge at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one stage entering its work function.
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    /// Records one stage leaving its work function.
    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// The largest overlap observed so far.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Stage that sleeps, watching for cancellation in small slices.
///
/// A cancelled sleep returns a retryable error; under a cancelled run the
/// executor treats that as cancellation, not failure.
#[derive(Debug)]
pub struct SleepStage {
    delay: Duration,
    value: Value,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl SleepStage {
    /// Creates a sleeping stage returning `null`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            value: Value::Null,
            gauge: None,
        }
    }

    /// Sets the value returned after the sleep.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    /// Attaches a gauge spanning the whole work function.
    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    async fn sleep_watching(&self, ctx: &StageContext) -> Result<(), WorkError> {
        let mut remaining = self.delay;
        while !remaining.is_zero() {
            if ctx.is_cancelled() {
                return Err(WorkError::retryable("sleep interrupted by cancellation"));
            }
            let slice = remaining.min(Duration::from_millis(5));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for SleepStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Value, WorkError> {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        let result = self.sleep_watching(ctx).await;
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }
        result.map(|()| self.value.clone())
    }
}

/// Stage that appends `start:<name>` and `end:<name>` markers to a shared log
/// and returns its own stage name.
#[derive(Debug)]
pub struct RecordingStage {
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl RecordingStage {
    /// Creates a recording stage writing to `log`.
    #[must_use]
    pub const fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log,
            delay: Duration::ZERO,
        }
    }

    /// Adds a sleep between the start and end markers.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Stage for RecordingStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Value, WorkError> {
        self.log.lock().push(format!("start:{}", ctx.stage_name()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.lock().push(format!("end:{}", ctx.stage_name()));
        Ok(Value::String(ctx.stage_name().to_string()))
    }
}
