//! The finished MP3 and its target name.

use crate::error::InputError;

/// Characters that are not allowed in file names on common filesystems and
/// cloud stores.
const RESERVED_CHARACTERS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// A complete MP3 bitstream ready for upload.
///
/// The bytes are the in-order concatenation of every non-empty encoded
/// frame followed by the encoder's flush output, or the file produced by an
/// external transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp3Artifact {
    bytes: Vec<u8>,
    file_name: String,
}

impl Mp3Artifact {
    /// Pair encoded bytes with an already-normalised target name.
    pub fn new(bytes: Vec<u8>, file_name: String) -> Self {
        Self { bytes, file_name }
    }

    /// Pair encoded bytes with a user-supplied base name.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::MissingName`] if nothing usable is left of the
    /// base name.
    pub fn named(bytes: Vec<u8>, base_name: &str) -> Result<Self, InputError> {
        Ok(Self::new(bytes, target_file_name(base_name)?))
    }

    /// The encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Give up the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Target file name, always ending in `.mp3`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Derive the artifact's file name from the name the user typed.
///
/// A trailing `.mp3` (any case) is removed first so it is never doubled,
/// reserved and control characters become `_`, surrounding whitespace and
/// trailing dots are trimmed, and `.mp3` is appended.
///
/// ```
/// use mp3drop::target_file_name;
///
/// assert_eq!(target_file_name("My Song").unwrap(), "My Song.mp3");
/// assert_eq!(target_file_name("My Song.mp3").unwrap(), "My Song.mp3");
/// assert_eq!(target_file_name("a/b:c").unwrap(), "a_b_c.mp3");
/// ```
///
/// # Errors
///
/// Returns [`InputError::MissingName`] for an empty or whitespace-only name.
pub fn target_file_name(base_name: &str) -> Result<String, InputError> {
    let trimmed = base_name.trim();
    let stem = strip_mp3_suffix(trimmed).trim_end();

    let sanitized: String = stem
        .chars()
        .map(|character| {
            if RESERVED_CHARACTERS.contains(&character) || character.is_control() {
                '_'
            } else {
                character
            }
        })
        .collect();
    let sanitized = sanitized.trim().trim_end_matches('.').trim_end();

    if sanitized.is_empty() {
        return Err(InputError::MissingName);
    }
    Ok(format!("{sanitized}.mp3"))
}

/// Relay-side normalisation: append `.mp3` only when it is absent.
pub fn relay_file_name(file_name: &str) -> String {
    if file_name.ends_with(".mp3") {
        file_name.to_string()
    } else {
        format!("{file_name}.mp3")
    }
}

/// Returns `true` if `bytes` starts with an MPEG audio frame sync (11 set bits).
pub fn has_frame_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0
}

fn strip_mp3_suffix(name: &str) -> &str {
    let cut = name.len().saturating_sub(4);
    match name.get(cut..) {
        Some(suffix) if suffix.eq_ignore_ascii_case(".mp3") => &name[..cut],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_case_insensitive() {
        assert_eq!(target_file_name("Track.MP3").unwrap(), "Track.mp3");
        assert_eq!(target_file_name("  spaced  ").unwrap(), "spaced.mp3");
    }

    #[test]
    fn all_reserved_characters_are_replaced() {
        assert_eq!(
            target_file_name(r#"a\b*c?d"e<f>g|h"#).unwrap(),
            "a_b_c_d_e_f_g_h.mp3"
        );
        assert_eq!(target_file_name("tab\there").unwrap(), "tab_here.mp3");
    }

    #[test]
    fn empty_names_are_rejected() {
        assert_eq!(target_file_name(""), Err(InputError::MissingName));
        assert_eq!(target_file_name("   "), Err(InputError::MissingName));
        assert_eq!(target_file_name(".mp3"), Err(InputError::MissingName));
        assert_eq!(target_file_name("..."), Err(InputError::MissingName));
    }

    #[test]
    fn relay_appends_only_when_absent() {
        assert_eq!(relay_file_name("x"), "x.mp3");
        assert_eq!(relay_file_name("x.mp3"), "x.mp3");
    }

    #[test]
    fn frame_sync_detection() {
        assert!(has_frame_sync(&[0xFF, 0xFB, 0x90]));
        assert!(!has_frame_sync(b"ID3"));
        assert!(!has_frame_sync(&[0xFF]));
    }

    #[test]
    fn multibyte_names_do_not_panic() {
        assert_eq!(target_file_name("é").unwrap(), "é.mp3");
        assert_eq!(target_file_name("日本語").unwrap(), "日本語.mp3");
    }
}
