//! Request validation.
//!
//! Runs before any processing. A request that fails here is rejected with
//! an [`InputError`] and never reaches a strategy.

use crate::{
    artifact::target_file_name,
    configuration::ConvertOptions,
    error::InputError,
    input::{VideoInput, media_type_for_name},
};

/// Media types that carry no information about the content.
const OPAQUE_MEDIA_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

/// Check a request and return the normalised target file name.
///
/// Checks, in order: content present, desired name usable, size within
/// `max_input_bytes`, declared type audio or video. When the declared type
/// is opaque the file name's extension decides.
///
/// # Errors
///
/// Returns the first [`InputError`] that applies.
pub fn validate_request(
    input: &VideoInput,
    desired_name: &str,
    options: &ConvertOptions,
) -> Result<String, InputError> {
    if input.is_empty() {
        return Err(InputError::MissingFile);
    }

    let target = target_file_name(desired_name)?;

    if input.len() > options.max_input_bytes {
        return Err(InputError::TooLarge {
            size: input.len(),
            limit: options.max_input_bytes,
        });
    }

    let declared = input.media_type().trim().to_ascii_lowercase();
    let effective = if OPAQUE_MEDIA_TYPES.contains(&declared.as_str()) {
        media_type_for_name(input.file_name()).unwrap_or_default().to_string()
    } else {
        declared.clone()
    };

    if !is_audio_or_video(&effective) {
        let shown = if declared.is_empty() { input.file_name().to_string() } else { declared };
        return Err(InputError::UnsupportedType(shown));
    }

    log::debug!(
        "Accepted {} ({effective}, {} bytes) as {target}",
        input.file_name(),
        input.len()
    );
    Ok(target)
}

fn is_audio_or_video(media_type: &str) -> bool {
    media_type.starts_with("video/") || media_type.starts_with("audio/")
}
