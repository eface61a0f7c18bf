//! Conversion configuration.
//!
//! [`ConvertOptions`] is a builder that threads limits, deadlines and the
//! per-stage settings through a [`Converter`](crate::Converter) without
//! polluting every function signature. All fields have defaults, so a
//! default-constructed value is a working configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use mp3drop::{ConvertOptions, EncoderOptions, UploadOptions};
//!
//! let options = ConvertOptions::new()
//!     .with_max_input_bytes(100 * 1024 * 1024)
//!     .with_strategy_timeout(Duration::from_secs(120))
//!     .with_encoder(EncoderOptions::new().with_bitrate_kbps(192))
//!     .with_upload(UploadOptions::new().with_max_attempts(5));
//! ```

use std::time::Duration;

use crate::capture::{RECORDING_FORMATS, RecordingFormat};

/// Default input ceiling: 500 MiB.
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 500 * 1024 * 1024;

/// Settings for the capture-and-record strategy.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Slack added to the media duration to form the recording deadline.
    pub grace_period: Duration,
    /// Sample rate of the decoded capture.
    pub sample_rate: u32,
    /// Recording formats in preference order.
    pub recording_formats: Vec<RecordingFormat>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureOptions {
    /// Defaults: 5 s grace, 44.1 kHz, the built-in format ranking.
    pub fn new() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            sample_rate: 44_100,
            recording_formats: RECORDING_FORMATS.to_vec(),
        }
    }

    /// Set the slack added to the media duration.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the capture sample rate.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Replace the recording format ranking.
    #[must_use]
    pub fn with_recording_formats(mut self, formats: Vec<RecordingFormat>) -> Self {
        self.recording_formats = formats;
        self
    }
}

/// Settings for the MP3 frame encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Constant bitrate in kbit/s.
    pub bitrate_kbps: u32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderOptions {
    /// Defaults: 128 kbit/s.
    pub fn new() -> Self {
        Self { bitrate_kbps: 128 }
    }

    /// Set the bitrate. Clamped to the 8..=320 kbit/s range MP3 allows.
    #[must_use]
    pub fn with_bitrate_kbps(mut self, bitrate: u32) -> Self {
        self.bitrate_kbps = bitrate.clamp(8, 320);
        self
    }
}

/// Settings for the upload coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Attempts before giving up, at least 1.
    pub max_attempts: u32,
    /// Limit for each individual attempt.
    pub attempt_timeout: Duration,
    /// The wait after attempt `n` is `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadOptions {
    /// Defaults: 3 attempts, 60 s each, 1 s base delay.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
        }
    }

    /// Set the attempt budget. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the base backoff delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Configuration for a conversion request.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Largest accepted input, in bytes.
    pub max_input_bytes: u64,
    /// Deadline for the whole extraction stage (all strategies).
    pub extraction_timeout: Duration,
    /// Deadline for encoding followed by upload.
    pub delivery_timeout: Duration,
    /// Optional cap for each individual strategy.
    pub strategy_timeout: Option<Duration>,
    /// Capture strategy settings.
    pub capture: CaptureOptions,
    /// Encoder settings.
    pub encoder: EncoderOptions,
    /// Upload settings.
    pub upload: UploadOptions,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvertOptions {
    /// Create options with default settings.
    ///
    /// Defaults: 500 MiB ceiling, 10 minute extraction and delivery
    /// deadlines, no per-strategy cap.
    pub fn new() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            extraction_timeout: Duration::from_secs(600),
            delivery_timeout: Duration::from_secs(600),
            strategy_timeout: None,
            capture: CaptureOptions::new(),
            encoder: EncoderOptions::new(),
            upload: UploadOptions::new(),
        }
    }

    /// Set the input size ceiling.
    #[must_use]
    pub fn with_max_input_bytes(mut self, limit: u64) -> Self {
        self.max_input_bytes = limit;
        self
    }

    /// Set the extraction deadline.
    #[must_use]
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    /// Set the encoding-plus-upload deadline.
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Cap each individual strategy.
    #[must_use]
    pub fn with_strategy_timeout(mut self, timeout: Duration) -> Self {
        self.strategy_timeout = Some(timeout);
        self
    }

    /// Replace the capture settings.
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    /// Replace the encoder settings.
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replace the upload settings.
    #[must_use]
    pub fn with_upload(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }
}
