//! The conversion orchestrator.
//!
//! A [`Converter`] drives one request end to end: validate, extract through
//! the [`StrategySelector`], encode (unless the strategy already produced
//! MP3), package, upload. Extraction runs under its own deadline; encoding
//! and upload share a second one. Each request gets its own tracker and
//! cancellation tokens, so a single converter can serve concurrent requests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mp3drop::{ConversionError, Converter, LocalFolderRelay, VideoInput};
//!
//! # async fn example() -> Result<(), ConversionError> {
//! let relay = Arc::new(LocalFolderRelay::new("uploads"));
//! let converter = Converter::builder(relay).build();
//!
//! let outcome = converter
//!     .convert(VideoInput::from_path("talk.mp4")?, "Conference Talk")
//!     .await?;
//! println!("{} via {}", outcome.receipt.link, outcome.strategy);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::time::{Instant, timeout, timeout_at};

use crate::{
    artifact::{Mp3Artifact, has_frame_sync},
    buffer::AudioBuffer,
    capture::StreamCaptureStrategy,
    configuration::ConvertOptions,
    container::ContainerDecodeStrategy,
    encoder::{EncoderBackend, FrameEncoder, LameBackend},
    error::{ConversionError, EncodingError, StrategyError, TimeoutError},
    input::VideoInput,
    progress::{CancellationToken, NoOpProgress, ProgressSink, ProgressTracker, Stage},
    stream::{ConversionTask, ProgressStream, conversion_task, progress_channel},
    strategy::{Extracted, ExtractionStrategy, StrategyContext, StrategySelector},
    toolkit::{ExternalToolkitStrategy, FfmpegCommandTranscoder, ToolkitCandidate, ToolkitContext},
    upload::{StorageRelay, UploadCoordinator, UploadReceipt},
    validation::validate_request,
};

const ENCODING_SPAN: (u8, u8) = (60, 85);

/// Encoder progress is reported at most this many times per request.
const ENCODING_REPORTS: usize = 25;

/// What a successful conversion produced.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// The MP3 that was uploaded.
    pub artifact: Mp3Artifact,
    /// What the relay reported.
    pub receipt: UploadReceipt,
    /// The strategy that extracted the audio.
    pub strategy: String,
    /// Every strategy attempted, in order.
    pub attempted: Vec<String>,
}

/// Builder for [`Converter`].
pub struct ConverterBuilder {
    relay: Arc<dyn StorageRelay>,
    strategies: Option<Vec<Arc<dyn ExtractionStrategy>>>,
    toolkit: Option<Arc<ToolkitContext>>,
    backend: Option<Arc<dyn EncoderBackend>>,
    sink: Option<Arc<dyn ProgressSink>>,
    options: ConvertOptions,
}

impl ConverterBuilder {
    /// Start a builder that uploads to `relay`.
    pub fn new(relay: Arc<dyn StorageRelay>) -> Self {
        Self {
            relay,
            strategies: None,
            toolkit: None,
            backend: None,
            sink: None,
            options: ConvertOptions::new(),
        }
    }

    /// Replace the whole strategy list. Order is priority order.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn ExtractionStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Share a toolkit context with other converters.
    #[must_use]
    pub fn with_toolkit(mut self, toolkit: Arc<ToolkitContext>) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    /// Use a different MP3 backend.
    #[must_use]
    pub fn with_encoder_backend(mut self, backend: Arc<dyn EncoderBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Report progress to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the converter.
    ///
    /// Without explicit strategies the chain is stream capture, container
    /// decode, then the external toolkit. Without an explicit toolkit the
    /// only candidate is the local `ffmpeg` executable.
    pub fn build(self) -> Converter {
        let toolkit = self.toolkit.unwrap_or_else(|| {
            Arc::new(ToolkitContext::new(vec![ToolkitCandidate::ffmpeg_command(
                FfmpegCommandTranscoder::default(),
            )]))
        });

        let strategies = self.strategies.unwrap_or_else(|| {
            vec![
                Arc::new(StreamCaptureStrategy::new()) as Arc<dyn ExtractionStrategy>,
                Arc::new(ContainerDecodeStrategy::new()),
                Arc::new(ExternalToolkitStrategy::new(Arc::clone(&toolkit))),
            ]
        });
        let selector = strategies
            .into_iter()
            .fold(StrategySelector::new(), |selector, strategy| selector.with_strategy(strategy))
            .with_strategy_timeout(self.options.strategy_timeout);

        let backend = self.backend.unwrap_or_else(|| Arc::new(LameBackend::new()));

        Converter {
            selector,
            encoder: FrameEncoder::new(backend, self.options.encoder.clone()),
            coordinator: UploadCoordinator::new(self.relay, self.options.upload.clone()),
            toolkit,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoOpProgress)),
            options: self.options,
        }
    }
}

/// Converts videos into uploaded MP3 files.
///
/// Cloning is cheap; clones share the toolkit context and relay.
#[derive(Clone)]
pub struct Converter {
    selector: StrategySelector,
    encoder: FrameEncoder,
    coordinator: UploadCoordinator,
    toolkit: Arc<ToolkitContext>,
    sink: Arc<dyn ProgressSink>,
    options: ConvertOptions,
}

impl Converter {
    /// Start building a converter that uploads to `relay`.
    pub fn builder(relay: Arc<dyn StorageRelay>) -> ConverterBuilder {
        ConverterBuilder::new(relay)
    }

    /// The options in effect.
    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// The shared toolkit context.
    pub fn toolkit(&self) -> &Arc<ToolkitContext> {
        &self.toolkit
    }

    /// Strategy names in priority order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.selector
            .strategies()
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    /// Run every strategy's capability probe.
    pub async fn probe_strategies(&self) -> Vec<(String, Result<(), StrategyError>)> {
        let mut results = Vec::with_capacity(self.selector.strategies().len());
        for strategy in self.selector.strategies() {
            results.push((strategy.name().to_string(), strategy.probe().await));
        }
        results
    }

    /// Convert `input` and upload it as `desired_name` (`.mp3` is appended).
    ///
    /// # Errors
    ///
    /// Returns the single [`ConversionError`] that ended the request.
    pub async fn convert(
        &self,
        input: VideoInput,
        desired_name: &str,
    ) -> Result<ConversionOutcome, ConversionError> {
        self.run(&input, desired_name, Arc::clone(&self.sink)).await
    }

    /// Run the conversion in the background.
    ///
    /// Must be called from within a Tokio runtime. Events reach both the
    /// returned stream and the converter's own sink.
    pub fn start(
        &self,
        input: VideoInput,
        desired_name: impl Into<String>,
    ) -> (ProgressStream, ConversionTask) {
        let (sink, stream, stage) = progress_channel(Arc::clone(&self.sink));
        let converter = self.clone();
        let desired_name = desired_name.into();
        let handle = tokio::spawn(async move { converter.run(&input, &desired_name, sink).await });
        (stream, conversion_task(handle, stage))
    }

    async fn run(
        &self,
        input: &VideoInput,
        desired_name: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ConversionOutcome, ConversionError> {
        let tracker = Arc::new(ProgressTracker::new(sink));
        let result = self.pipeline(input, desired_name, &tracker).await;

        match &result {
            Ok(outcome) => {
                log::info!(
                    "Converted {} into {} ({} bytes)",
                    input.file_name(),
                    outcome.receipt.name,
                    outcome.artifact.len()
                );
                tracker.emit(100, Stage::Done, format!("Saved {}", outcome.receipt.name));
            }
            Err(error) => log::error!("{}: {error}", input.file_name()),
        }
        result
    }

    async fn pipeline(
        &self,
        input: &VideoInput,
        desired_name: &str,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<ConversionOutcome, ConversionError> {
        let target = validate_request(input, desired_name, &self.options)?;
        tracker.emit(
            5,
            Stage::Loading,
            format!("Loaded {} ({} bytes)", input.file_name(), input.len()),
        );

        let context = StrategyContext::new(Arc::clone(tracker), self.options.capture.clone());
        let extraction_limit = self.options.extraction_timeout;
        let selection = timeout(extraction_limit, self.selector.select(input, &context))
            .await
            .map_err(|_| TimeoutError {
                stage: Stage::Extracting,
                limit: extraction_limit,
            })??;

        let delivery_limit = self.options.delivery_timeout;
        let deadline = Instant::now() + delivery_limit;
        let expired = |stage| TimeoutError {
            stage,
            limit: delivery_limit,
        };

        let bytes = match selection.extracted {
            Extracted::Pcm(buffer) => timeout_at(deadline, self.encode(buffer, tracker))
                .await
                .map_err(|_| expired(Stage::Encoding))??,
            Extracted::Mp3(bytes) => {
                tracker.emit(ENCODING_SPAN.1, Stage::Encoding, "Audio is already MP3");
                bytes
            }
        };

        tracker.emit(88, Stage::Packaging, format!("Packaging {target}"));
        if !has_frame_sync(&bytes) {
            log::warn!("{target} does not start with an MP3 frame header");
        }
        let artifact = Mp3Artifact::new(bytes, target);

        let receipt = timeout_at(deadline, self.coordinator.upload(&artifact, tracker))
            .await
            .map_err(|_| expired(Stage::Uploading))??;

        Ok(ConversionOutcome {
            artifact,
            receipt,
            strategy: selection.strategy,
            attempted: selection.attempted,
        })
    }

    async fn encode(
        &self,
        buffer: AudioBuffer,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Vec<u8>, EncodingError> {
        if buffer.is_empty() {
            return Err(EncodingError::InvalidBuffer("no samples to encode".to_string()));
        }

        let (start, end) = ENCODING_SPAN;
        tracker.emit(
            start,
            Stage::Encoding,
            format!("Encoding at {} kbit/s", self.encoder.bitrate_kbps()),
        );

        let encoder = self.encoder.clone();
        let token = CancellationToken::new();
        let _cancel_on_drop = token.drop_guard();
        let progress = Arc::clone(tracker);

        let bytes = tokio::task::spawn_blocking(move || {
            encoder.encode_to_vec(&buffer, &token, |done, total| {
                let step = (total / ENCODING_REPORTS).max(1);
                if done % step == 0 || done == total {
                    progress.emit_span(
                        start,
                        end,
                        done as u64,
                        total as u64,
                        Stage::Encoding,
                        format!("Encoded block {done} of {total}"),
                    );
                }
            })
        })
        .await
        .map_err(|error| EncodingError::Primitive(format!("encoder task failed: {error}")))??;

        if bytes.is_empty() {
            return Err(EncodingError::Primitive("encoder produced no output".to_string()));
        }
        Ok(bytes)
    }
}
