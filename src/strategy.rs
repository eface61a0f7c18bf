//! Audio extraction strategies and the selector that orders them.
//!
//! Every way of getting audio out of a video implements
//! [`ExtractionStrategy`]. The [`StrategySelector`] walks them in priority
//! order through a [`FallbackChain`] until one yields either PCM audio or a
//! finished MP3.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    buffer::AudioBuffer,
    configuration::CaptureOptions,
    error::{ExtractionError, StrategyError},
    fallback::FallbackChain,
    input::VideoInput,
    progress::{CancellationToken, ProgressTracker, Stage},
};

/// Percentage span reserved for extraction progress.
pub(crate) const EXTRACTION_SPAN: (u8, u8) = (10, 50);

/// What a successful strategy produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// Decoded PCM, to be routed through the frame encoder.
    Pcm(AudioBuffer),
    /// A finished MP3 bitstream; the frame encoder is skipped.
    Mp3(Vec<u8>),
}

impl Extracted {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Extracted::Pcm(buffer) => format!(
                "{:.1}s of {}-channel PCM at {} Hz",
                buffer.duration_seconds(),
                buffer.channel_count(),
                buffer.sample_rate()
            ),
            Extracted::Mp3(bytes) => format!("{} bytes of MP3", bytes.len()),
        }
    }
}

/// Per-attempt state handed to a strategy.
#[derive(Clone)]
pub struct StrategyContext {
    /// Fires when the attempt's deadline expires or the request is dropped.
    pub cancellation: CancellationToken,
    /// Progress reporter for the request.
    pub tracker: Arc<ProgressTracker>,
    /// Capture strategy settings.
    pub capture: CaptureOptions,
}

impl StrategyContext {
    /// Build a context.
    pub fn new(tracker: Arc<ProgressTracker>, capture: CaptureOptions) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            tracker,
            capture,
        }
    }

    /// Report a position inside the extraction span.
    pub fn report(&self, done: u64, total: u64, message: impl Into<String>) {
        let (start, end) = EXTRACTION_SPAN;
        self.tracker.emit_span(start, end, done, total, Stage::Extracting, message);
    }

    fn for_attempt(&self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            tracker: Arc::clone(&self.tracker),
            capture: self.capture.clone(),
        }
    }
}

/// One way of deriving audio from a video.
///
/// Implementations must release everything they acquire (streams, scratch
/// files, child processes) before `extract` returns, on every exit path.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Stable name used in logs and error traces.
    fn name(&self) -> &str;

    /// Check that the strategy can run at all in this environment.
    async fn probe(&self) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Derive audio from `input`.
    async fn extract(
        &self,
        input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Extracted, StrategyError>;
}

/// The result of a successful selection.
#[derive(Debug)]
pub struct Selection {
    /// The strategy's output.
    pub extracted: Extracted,
    /// Name of the strategy that succeeded.
    pub strategy: String,
    /// Every strategy attempted, in order, including the winner.
    pub attempted: Vec<String>,
}

/// Tries strategies in a fixed order until one succeeds.
#[derive(Clone, Default)]
pub struct StrategySelector {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    strategy_timeout: Option<Duration>,
}

impl StrategySelector {
    /// An empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy at the lowest priority.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Cap each individual strategy.
    #[must_use]
    pub fn with_strategy_timeout(mut self, limit: Option<Duration>) -> Self {
        self.strategy_timeout = limit;
        self
    }

    /// The strategies in priority order.
    pub fn strategies(&self) -> &[Arc<dyn ExtractionStrategy>] {
        &self.strategies
    }

    /// Run the strategies against `input`.
    ///
    /// A strategy fails over to the next on any error: a failed probe, a
    /// strategy error, or its own deadline. The progress floor is reset
    /// between strategies.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::Exhausted`] naming the last cause when
    /// every strategy fails, or [`ExtractionError::NoStrategies`].
    pub async fn select(
        &self,
        input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Selection, ExtractionError> {
        if self.strategies.is_empty() {
            return Err(ExtractionError::NoStrategies);
        }

        let chain: FallbackChain<Arc<dyn ExtractionStrategy>> = self
            .strategies
            .iter()
            .map(|strategy| (strategy.name().to_string(), Arc::clone(strategy)))
            .collect();
        let strategy_timeout = self.strategy_timeout;

        let outcome = chain
            .run(
                |strategy| async move {
                    let token = CancellationToken::new();
                    let guard = token.drop_guard();
                    let attempt = context.for_attempt(token);
                    attempt.tracker.emit(
                        EXTRACTION_SPAN.0,
                        Stage::Extracting,
                        format!("Extracting audio ({})", strategy.name()),
                    );

                    let result =
                        run_attempt(strategy.as_ref(), input, &attempt, strategy_timeout).await;
                    if result.is_ok() {
                        guard.disarm();
                    }
                    result
                },
                |_, _| context.tracker.reset(),
            )
            .await;

        match outcome {
            Ok((extracted, trace)) => {
                let strategy = trace.attempted.last().cloned().unwrap_or_default();
                log::info!("Extracted {} via {strategy}", extracted.describe());
                Ok(Selection {
                    extracted,
                    strategy,
                    attempted: trace.attempted,
                })
            }
            Err(trace) => {
                let (attempted, last) = trace.into_last();
                match last {
                    Some(last) => Err(ExtractionError::Exhausted { attempted, last }),
                    None => Err(ExtractionError::NoStrategies),
                }
            }
        }
    }
}

async fn run_attempt(
    strategy: &dyn ExtractionStrategy,
    input: &VideoInput,
    context: &StrategyContext,
    strategy_timeout: Option<Duration>,
) -> Result<Extracted, StrategyError> {
    strategy.probe().await?;

    let extraction = strategy.extract(input, context);
    match strategy_timeout {
        Some(limit) => tokio::time::timeout(limit, extraction)
            .await
            .map_err(|_| {
                context.cancellation.cancel();
                StrategyError::TimedOut(limit)
            })?,
        None => extraction.await,
    }
}
