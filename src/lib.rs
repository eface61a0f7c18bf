//! # mp3drop
//!
//! Pull the audio track out of a video, encode it as MP3 and deposit it in a
//! cloud storage folder.
//!
//! A [`Converter`] runs one request through a fixed pipeline:
//!
//! 1. **Validation**: the input must be present, within the size ceiling and
//!    declared as audio or video; the desired name must survive sanitising.
//! 2. **Extraction**: a [`StrategySelector`] tries, in priority order,
//!    recording the audio stream ([`StreamCaptureStrategy`]), decoding the
//!    bytes as an audio container ([`ContainerDecodeStrategy`]) and handing
//!    the file to an external transcoder ([`ExternalToolkitStrategy`]).
//! 3. **Encoding**: PCM audio is split into 1152-sample blocks and encoded by
//!    a [`FrameEncoder`]. Transcoder output is already MP3 and skips this.
//! 4. **Upload**: an [`UploadCoordinator`] submits the artifact to a
//!    [`StorageRelay`] with bounded retries and linear backoff.
//!
//! Every request ends in exactly one [`ConversionOutcome`] or one
//! [`ConversionError`] naming the stage that failed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mp3drop::{ConversionError, Converter, HttpStorageRelay, StaticCredentials, VideoInput};
//!
//! # async fn example() -> Result<(), ConversionError> {
//! let relay = HttpStorageRelay::new("https://relay.example.com/upload")
//!     .with_credentials(Arc::new(StaticCredentials::new("token")));
//! let converter = Converter::builder(Arc::new(relay)).build();
//!
//! let outcome = converter
//!     .convert(VideoInput::from_path("lecture.mp4")?, "Lecture 1")
//!     .await?;
//! println!("uploaded {} -> {}", outcome.receipt.name, outcome.receipt.link);
//! # Ok(())
//! # }
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries with `libmp3lame` must be installed. The
//! external toolkit strategy additionally looks for the `ffmpeg` executable.

pub mod artifact;
pub mod buffer;
pub mod capture;
pub mod configuration;
pub mod container;
pub mod converter;
pub mod encoder;
pub mod error;
pub mod fallback;
pub mod ffmpeg;
pub mod input;
pub mod progress;
pub mod relay;
pub mod remote_job;
pub mod sample;
pub mod strategy;
pub mod stream;
pub mod toolkit;
pub mod upload;
pub mod validation;

pub use artifact::{Mp3Artifact, has_frame_sync, relay_file_name, target_file_name};
pub use buffer::AudioBuffer;
pub use capture::{
    RECORDING_FORMATS, RecordingFormat, StreamCaptureStrategy, select_recording_format,
};
pub use configuration::{
    CaptureOptions, ConvertOptions, DEFAULT_MAX_INPUT_BYTES, EncoderOptions, UploadOptions,
};
pub use container::{ContainerDecodeStrategy, decode_container};
pub use converter::{ConversionOutcome, Converter, ConverterBuilder};
pub use encoder::{
    EncodedFrame, EncoderBackend, EncoderSpec, FrameEncoder, LameBackend, MP3_BLOCK_SIZE,
    Mp3Primitive,
};
pub use error::{
    AuthError, ConversionError, EncodingError, ExtractionError, InputError, RelayError,
    RelayErrorKind, StrategyError, TimeoutError, UploadError,
};
pub use fallback::{FallbackChain, FallbackTrace};
pub use ffmpeg::{FfmpegLogLevel, encoder_available, set_ffmpeg_log_level};
pub use input::VideoInput;
pub use progress::{CancellationToken, ProgressEvent, ProgressSink, ProgressTracker, Stage};
pub use relay::{
    CredentialProvider, EnvCredentials, HttpStorageRelay, LocalFolderRelay, RelayFailure,
    RelayRequest, RelaySuccess, StaticCredentials,
};
pub use remote_job::{CloudConvertApi, ConversionJobApi, JobStatus, RemoteJobTranscoder};
pub use sample::{convert_block, to_pcm16};
pub use stream::{ConversionTask, ProgressStream};
pub use strategy::{Extracted, ExtractionStrategy, Selection, StrategyContext, StrategySelector};
pub use toolkit::{
    ExternalToolkitStrategy, FfmpegCommandTranscoder, ToolkitCandidate, ToolkitContext, Transcoder,
};
pub use upload::{
    AttemptOutcome, StorageRelay, StoredFile, UploadAttempt, UploadCoordinator, UploadPayload,
    UploadReceipt,
};
pub use validation::validate_request;
