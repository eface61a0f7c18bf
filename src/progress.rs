//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressSink`] for observing a conversion,
//! [`ProgressEvent`] for the discrete percentage/message pairs it receives,
//! and [`CancellationToken`] for stopping blocking work when a deadline
//! expires.
//!
//! # Example
//!
//! ```
//! use mp3drop::{ProgressEvent, ProgressSink};
//!
//! struct PrintProgress;
//!
//! impl ProgressSink for PrintProgress {
//!     fn on_progress(&self, event: &ProgressEvent) {
//!         println!("[{:>3}%] {}", event.percent, event.message);
//!     }
//! }
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::Notify;

/// The pipeline stage an event or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Validating and reading the input.
    Loading,
    /// Running the extraction strategies.
    Extracting,
    /// Encoding PCM blocks into MP3 frames.
    Encoding,
    /// Assembling the final artifact.
    Packaging,
    /// Delivering the artifact to the storage relay.
    Uploading,
    /// The request finished successfully.
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Loading => write!(f, "loading"),
            Stage::Extracting => write!(f, "extraction"),
            Stage::Encoding => write!(f, "encoding"),
            Stage::Packaging => write!(f, "packaging"),
            Stage::Uploading => write!(f, "upload"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// A discrete progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Completion percentage, 0 to 100.
    pub percent: u8,
    /// Stage the event belongs to.
    pub stage: Stage,
    /// Human-readable status line.
    pub message: String,
}

impl ProgressEvent {
    /// Create an event, clamping `percent` to 100.
    pub fn new(percent: u8, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            stage,
            message: message.into(),
        }
    }
}

/// Passive receiver of progress events.
///
/// Implementations must be [`Send`] and [`Sync`] because events are emitted
/// from blocking worker threads as well as from the async runtime.
///
/// Sinks are **infallible**: they observe but cannot halt the conversion.
pub trait ProgressSink: Send + Sync {
    /// Called for every event, in emission order.
    fn on_progress(&self, event: &ProgressEvent);
}

/// A sink that discards everything. The default when none is configured.
pub(crate) struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clones share state. Blocking strategies and the block encoder check
/// [`is_cancelled`](CancellationToken::is_cancelled) before each unit of
/// work; async code awaits [`cancelled`](CancellationToken::cancelled).
///
/// # Example
///
/// ```
/// use mp3drop::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenState::default()),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before the re-check so a concurrent `cancel` is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns a guard that cancels this token when dropped.
    ///
    /// Hold the guard across an `.await` so that a dropped (timed out)
    /// future stops the blocking job behind it.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            token: self.clone(),
            armed: true,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels its token on drop unless [`disarm`](CancelOnDrop::disarm)ed.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancellationToken,
    armed: bool,
}

impl CancelOnDrop {
    /// Keep the token alive after the guard goes away.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Emits events to a sink while keeping the percentage non-decreasing.
///
/// The floor only applies within one extraction path: the selector calls
/// [`reset`](ProgressTracker::reset) before it falls back to the next
/// strategy, which may then report a lower value.
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    last_percent: Mutex<Option<u8>>,
}

impl ProgressTracker {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            last_percent: Mutex::new(None),
        }
    }

    /// A tracker that reports nowhere.
    pub fn silent() -> Self {
        Self::new(Arc::new(NoOpProgress))
    }

    /// Emit an event. A percentage below the current floor is raised to it.
    pub fn emit(&self, percent: u8, stage: Stage, message: impl Into<String>) {
        let percent = {
            let mut last = match self.last_percent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let clamped = last.map_or(percent, |floor| percent.max(floor)).min(100);
            *last = Some(clamped);
            clamped
        };
        let event = ProgressEvent::new(percent, stage, message);
        log::debug!("progress {}% [{}] {}", event.percent, event.stage, event.message);
        self.sink.on_progress(&event);
    }

    /// Emit a fractional position inside the `[start, end]` percentage span.
    pub fn emit_span(
        &self,
        start: u8,
        end: u8,
        done: u64,
        total: u64,
        stage: Stage,
        message: impl Into<String>,
    ) {
        let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        let span = end.saturating_sub(start) as f64;
        let percent = start as f64 + (span * fraction.clamp(0.0, 1.0)).floor();
        self.emit(percent as u8, stage, message);
    }

    /// Drop the floor so a fallback path may start from a lower value.
    pub fn reset(&self) {
        let mut last = match self.last_percent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = None;
    }

    /// The last percentage that was emitted, if any.
    pub fn last_percent(&self) -> Option<u8> {
        match self.last_percent.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn tracker_never_decreases_until_reset() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tracker = ProgressTracker::new(recorder.clone());

        tracker.emit(20, Stage::Extracting, "a");
        tracker.emit(10, Stage::Extracting, "b");
        tracker.reset();
        tracker.emit(10, Stage::Extracting, "c");

        let percents: Vec<u8> = recorder.0.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![20, 20, 10]);
    }

    #[test]
    fn span_maps_fraction_into_range() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tracker = ProgressTracker::new(recorder.clone());

        tracker.emit_span(60, 80, 1, 2, Stage::Encoding, "half");
        tracker.emit_span(60, 80, 4, 2, Stage::Encoding, "over");

        let percents: Vec<u8> = recorder.0.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![70, 80]);
    }

    #[test]
    fn drop_guard_cancels_unless_disarmed() {
        let token = CancellationToken::new();
        drop(token.drop_guard());
        assert!(token.is_cancelled());

        let token = CancellationToken::new();
        token.drop_guard().disarm();
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wakes_without_the_clock_moving() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        token.cancel();
        waiter.await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn cancelled_returns_at_once_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!waiter.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }
}
