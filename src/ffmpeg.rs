//! FFmpeg bootstrap, log level and codec capability probes.
//!
//! The capture strategy and the LAME backend both need FFmpeg initialised
//! and need to know which encoders and muxers the linked build carries.
//! FFmpeg prints its own diagnostics to stderr independently of the `log`
//! facade; [`set_ffmpeg_log_level`] quiets or raises them.
//!
//! # Example
//!
//! ```no_run
//! use mp3drop::FfmpegLogLevel;
//!
//! let level: FfmpegLogLevel = "warn".parse().unwrap();
//! mp3drop::set_ffmpeg_log_level(level);
//! assert!(mp3drop::encoder_available("libmp3lame"));
//! ```

use std::{str::FromStr, sync::OnceLock};

use ffmpeg_next::util::log::Level;

/// How much FFmpeg itself prints.
///
/// Parses from `quiet`, `fatal`, `error`, `warning` (or `warn`), `info`
/// and `debug`, ignoring case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Nothing.
    Quiet,
    /// Unrecoverable failures only.
    Fatal,
    /// Errors.
    Error,
    /// Errors and warnings. FFmpeg's own default.
    Warning,
    /// Stream details as they are opened.
    Info,
    /// Everything, including per-packet chatter.
    Debug,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let level = match value.trim().to_ascii_lowercase().as_str() {
            "quiet" => FfmpegLogLevel::Quiet,
            "fatal" => FfmpegLogLevel::Fatal,
            "error" => FfmpegLogLevel::Error,
            "warning" | "warn" => FfmpegLogLevel::Warning,
            "info" => FfmpegLogLevel::Info,
            "debug" => FfmpegLogLevel::Debug,
            _ => return Err(format!("unknown FFmpeg log level: {value}")),
        };
        Ok(level)
    }
}

/// Change what FFmpeg writes to stderr. The `log` facade is unaffected.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}

/// Initialise FFmpeg once per process.
///
/// Safe to call repeatedly; later calls return the first call's outcome.
pub fn init() -> Result<(), ffmpeg_next::Error> {
    static INIT: OnceLock<Result<(), ffmpeg_next::Error>> = OnceLock::new();
    *INIT.get_or_init(|| {
        let result = ffmpeg_next::init();
        match &result {
            Ok(()) => log::debug!("FFmpeg initialised"),
            Err(error) => log::warn!("FFmpeg failed to initialise: {error}"),
        }
        result
    })
}

/// Returns `true` if the linked FFmpeg has an encoder registered as `name`.
pub fn encoder_available(name: &str) -> bool {
    init().is_ok() && ffmpeg_next::encoder::find_by_name(name).is_some()
}

/// Returns `true` if the linked FFmpeg can write the `name` container.
pub fn muxer_available(name: &str) -> bool {
    init().is_ok()
        && std::ffi::CString::new(name).is_ok_and(|name| {
            // SAFETY: `av_guess_format` only reads the NUL-terminated name and
            // returns a pointer into FFmpeg's static muxer table, or null.
            unsafe {
                let format = ffmpeg_next::ffi::av_guess_format(
                    name.as_ptr(),
                    std::ptr::null(),
                    std::ptr::null(),
                );
                !format.is_null()
            }
        })
}
