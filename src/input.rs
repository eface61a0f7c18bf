//! The caller-supplied video.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    sync::Arc,
};

use crate::error::InputError;

/// Raw video content plus what the caller declared about it.
///
/// Immutable once built. Cloning is cheap: the bytes are shared, which lets
/// blocking strategies take their own handle without copying the file.
#[derive(Clone)]
pub struct VideoInput {
    data: Arc<[u8]>,
    file_name: String,
    media_type: String,
}

impl Debug for VideoInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoInput")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl VideoInput {
    /// Wrap in-memory content.
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
            media_type: media_type.into(),
        }
    }

    /// Read a file from disk, deriving the media type from its extension.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::Unreadable`] if the file cannot be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|error| InputError::Unreadable(format!("{}: {error}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_type = media_type_for_name(&file_name).unwrap_or_default().to_string();
        log::debug!("Read {} bytes from {} ({media_type})", data.len(), path.display());
        Ok(Self::new(data, file_name, media_type))
    }

    /// The raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// A shared handle to the raw bytes.
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Declared file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared media type (may be empty).
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Byte length.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns `true` when there is no content.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lower-cased extension of the declared file name.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
    }
}

/// Guess a media type from a file name's extension.
pub fn media_type_for_name(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_string_lossy().to_ascii_lowercase();
    let media_type = match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mpg" | "mpeg" => "video/mpeg",
        "ts" | "mts" | "m2ts" => "video/mp2t",
        "3gp" => "video/3gpp",
        "ogv" => "video/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "opus" => "audio/opus",
        _ => return None,
    };
    Some(media_type)
}
