//! Request validation integration tests.

use mp3drop::{ConvertOptions, DEFAULT_MAX_INPUT_BYTES, InputError, VideoInput, validate_request};

fn video(media_type: &str) -> VideoInput {
    VideoInput::new(vec![0_u8; 16], "clip.mp4", media_type)
}

#[test]
fn accepts_video_and_audio_types() {
    let options = ConvertOptions::new();
    assert_eq!(validate_request(&video("video/mp4"), "Clip", &options).unwrap(), "Clip.mp3");
    assert_eq!(validate_request(&video("audio/ogg"), "Clip", &options).unwrap(), "Clip.mp3");
    assert_eq!(validate_request(&video("Video/WebM"), "Clip", &options).unwrap(), "Clip.mp3");
}

#[test]
fn empty_content_is_missing_file() {
    let input = VideoInput::new(Vec::<u8>::new(), "clip.mp4", "video/mp4");
    assert_eq!(
        validate_request(&input, "Clip", &ConvertOptions::new()),
        Err(InputError::MissingFile)
    );
}

#[test]
fn missing_file_is_reported_before_missing_name() {
    let input = VideoInput::new(Vec::<u8>::new(), "clip.mp4", "video/mp4");
    assert_eq!(
        validate_request(&input, "", &ConvertOptions::new()),
        Err(InputError::MissingFile)
    );
}

#[test]
fn blank_name_is_missing_name() {
    assert_eq!(
        validate_request(&video("video/mp4"), "  ", &ConvertOptions::new()),
        Err(InputError::MissingName)
    );
}

#[test]
fn size_ceiling_is_enforced() {
    let options = ConvertOptions::new().with_max_input_bytes(15);
    assert_eq!(
        validate_request(&video("video/mp4"), "Clip", &options),
        Err(InputError::TooLarge { size: 16, limit: 15 })
    );

    let options = ConvertOptions::new().with_max_input_bytes(16);
    assert!(validate_request(&video("video/mp4"), "Clip", &options).is_ok());
}

#[test]
fn default_ceiling_is_500_mib() {
    assert_eq!(DEFAULT_MAX_INPUT_BYTES, 524_288_000);
    assert_eq!(ConvertOptions::new().max_input_bytes, DEFAULT_MAX_INPUT_BYTES);
}

#[test]
fn other_types_are_unsupported() {
    assert_eq!(
        validate_request(&video("image/png"), "Clip", &ConvertOptions::new()),
        Err(InputError::UnsupportedType("image/png".to_string()))
    );
}

#[test]
fn opaque_type_falls_back_to_extension() {
    let options = ConvertOptions::new();
    assert!(validate_request(&video("application/octet-stream"), "Clip", &options).is_ok());
    assert!(validate_request(&video(""), "Clip", &options).is_ok());

    let document = VideoInput::new(vec![1_u8], "notes.txt", "");
    assert_eq!(
        validate_request(&document, "Notes", &options),
        Err(InputError::UnsupportedType("notes.txt".to_string()))
    );
}

#[test]
fn input_reads_from_disk() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("Holiday.WEBM");
    std::fs::write(&path, [1_u8, 2, 3]).unwrap();

    let input = VideoInput::from_path(&path).unwrap();
    assert_eq!(input.file_name(), "Holiday.WEBM");
    assert_eq!(input.media_type(), "video/webm");
    assert_eq!(input.extension().as_deref(), Some("webm"));
    assert_eq!(input.len(), 3);
}

#[test]
fn unreadable_path_is_an_input_error() {
    let result = VideoInput::from_path("/nonexistent/mp3drop/clip.mp4");
    assert!(matches!(result, Err(InputError::Unreadable(_))));
}
