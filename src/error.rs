//! Error types for the `mp3drop` crate.
//!
//! Every stage of a conversion has its own error type. Stage-local failures
//! are classified into one of these before they reach the
//! [`Converter`](crate::Converter), which only ever surfaces a single
//! [`ConversionError`] per request.

use std::{io::Error as IoError, time::Duration};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

use crate::progress::Stage;

/// The terminal error of a conversion request.
///
/// `Display` renders `"<stage> failed: <cause>"`, which is the one message a
/// caller shows to the user.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConversionError {
    /// The request was rejected before any processing started.
    #[error("{stage} failed: {0}", stage = Stage::Loading)]
    Input(#[from] InputError),

    /// Every extraction strategy failed.
    #[error("{stage} failed: {0}", stage = Stage::Extracting)]
    Extraction(#[from] ExtractionError),

    /// The MP3 encoding primitive reported an error.
    #[error("{stage} failed: {0}", stage = Stage::Encoding)]
    Encoding(#[from] EncodingError),

    /// The artifact could not be delivered to the storage relay.
    #[error("{stage} failed: {0}", stage = Stage::Uploading)]
    Upload(#[from] UploadError),

    /// A stage exceeded its deadline.
    #[error("{stage} failed: {0}", stage = .0.stage)]
    Timeout(#[from] TimeoutError),

    /// The background conversion task ended without producing a result.
    #[error("{stage} failed: conversion task stopped ({reason})")]
    Aborted {
        /// The last stage the task reported.
        stage: Stage,
        /// Why the task stopped.
        reason: String,
    },
}

impl ConversionError {
    /// The stage that caused the failure.
    pub fn stage(&self) -> Stage {
        match self {
            ConversionError::Input(_) => Stage::Loading,
            ConversionError::Extraction(_) => Stage::Extracting,
            ConversionError::Encoding(_) => Stage::Encoding,
            ConversionError::Upload(_) => Stage::Uploading,
            ConversionError::Timeout(timeout) => timeout.stage,
            ConversionError::Aborted { stage, .. } => *stage,
        }
    }
}

/// The request itself is unusable. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InputError {
    /// No video content was supplied.
    #[error("no video file was provided")]
    MissingFile,

    /// The desired output name is empty (or nothing is left after sanitising).
    #[error("no name was given for the audio file")]
    MissingName,

    /// The input is larger than the configured ceiling.
    #[error("file is {size} bytes, the limit is {limit} bytes")]
    TooLarge {
        /// Declared byte length of the input.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The declared media type is neither video nor audio.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The input file could not be read.
    #[error("could not read input: {0}")]
    Unreadable(String),
}

/// Why a single extraction strategy failed.
///
/// These never leave the selector on their own: an exhausted chain is
/// reported as [`ExtractionError::Exhausted`] carrying the last one.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StrategyError {
    /// The strategy's capability probe failed (missing API, codec, tool or key).
    #[error("{0} is not available")]
    Unsupported(String),

    /// None of the ranked recording formats can be produced.
    #[error("no supported recording format found")]
    NoRecordingFormat,

    /// The input carries no audio track.
    #[error("input has no audio track")]
    NoAudioTrack,

    /// The input reports no duration, so a capture cannot be bounded.
    #[error("input has no duration, it may not have an audio track")]
    NoDuration,

    /// Decoding the (recorded or original) container failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Recording the capture stream failed.
    #[error("recording failed: {0}")]
    Record(String),

    /// The external transcoder failed.
    #[error("transcoder failed: {0}")]
    Transcode(String),

    /// The strategy's own deadline expired and the operation was stopped.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The strategy was stopped through its cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Scratch storage could not be created or read.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl From<FfmpegError> for StrategyError {
    fn from(error: FfmpegError) -> Self {
        StrategyError::Decode(error.to_string())
    }
}

/// All extraction strategies were tried and none produced audio.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractionError {
    /// The whole chain failed; `last` is the final strategy's cause.
    #[error("all strategies failed ({chain}), last cause: {last}", chain = .attempted.join(" -> "))]
    Exhausted {
        /// Names of the strategies that were attempted, in order.
        attempted: Vec<String>,
        /// The cause reported by the last strategy.
        last: StrategyError,
    },

    /// The selector was built without any strategy.
    #[error("no extraction strategy is configured")]
    NoStrategies,
}

/// The encoding primitive failed. Encoding is deterministic so this is fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodingError {
    /// The audio buffer violates its invariants.
    #[error("invalid audio buffer: {0}")]
    InvalidBuffer(String),

    /// The MP3 encoder is not available in the linked FFmpeg build.
    #[error("MP3 encoder unavailable: {0}")]
    Unavailable(String),

    /// The encoder does not accept this sample rate.
    #[error("sample rate {0} Hz is not supported by MP3")]
    UnsupportedSampleRate(u32),

    /// The encoder reported an error while encoding or flushing.
    #[error("encoder error: {0}")]
    Primitive(String),

    /// The block loop was stopped through its cancellation token.
    #[error("cancelled")]
    Cancelled,
}

impl From<FfmpegError> for EncodingError {
    fn from(error: FfmpegError) -> Self {
        EncodingError::Primitive(error.to_string())
    }
}

/// The artifact could not be delivered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// A non-retryable failure (payload too large, credentials rejected).
    #[error("upload rejected on attempt {attempt}: {cause}")]
    Fatal {
        /// Attempt number that produced the failure.
        attempt: u32,
        /// The relay's failure.
        cause: RelayError,
    },

    /// Every attempt failed with a retryable error.
    #[error("upload failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure of the last attempt.
        last: RelayError,
    },
}

impl UploadError {
    /// Returns `true` for the fatal (not retried) subtype.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UploadError::Fatal { .. })
    }
}

/// Kind of a relay-side failure, used to classify retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RelayErrorKind {
    /// The relay answered with a non-2xx status.
    Status,
    /// The request never got a proper response.
    Network,
    /// The attempt exceeded its per-attempt timeout.
    Timeout,
    /// The credential provider could not supply a valid token.
    Auth,
    /// The relay answered 2xx with a body that could not be understood.
    Protocol,
}

/// A failure reported by a [`StorageRelay`](crate::StorageRelay).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "{message}{suffix}",
    suffix = .status.map(|code| format!(" (status {code})")).unwrap_or_default()
)]
pub struct RelayError {
    /// Failure kind.
    pub kind: RelayErrorKind,
    /// HTTP-style status, when the relay answered.
    pub status: Option<u16>,
    /// Human-readable cause.
    pub message: String,
}

impl RelayError {
    /// A non-2xx answer from the relay.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: RelayErrorKind::Status,
            status: Some(status),
            message: message.into(),
        }
    }

    /// A transport-level failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: RelayErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    /// A per-attempt timeout.
    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: RelayErrorKind::Timeout,
            status: None,
            message: format!("no response within {limit:?}"),
        }
    }

    /// A credential failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: RelayErrorKind::Auth,
            status: None,
            message: message.into(),
        }
    }

    /// An unreadable success response.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: RelayErrorKind::Protocol,
            status: None,
            message: message.into(),
        }
    }
}

/// The credential provider could not supply a bearer token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("credentials unavailable: {0}")]
pub struct AuthError(pub String);

impl From<AuthError> for RelayError {
    fn from(error: AuthError) -> Self {
        RelayError::auth(error.to_string())
    }
}

/// A stage exceeded its deadline and was aborted.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("timed out after {limit:?}")]
pub struct TimeoutError {
    /// The stage that timed out.
    pub stage: Stage,
    /// The deadline that was exceeded.
    pub limit: Duration,
}
