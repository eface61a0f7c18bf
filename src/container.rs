//! Direct container decode.
//!
//! Hands the original bytes to symphonia as if they were an audio file.
//! This works for audio-only uploads and audio-compatible containers (Ogg,
//! WAV, FLAC, MP3, ADTS) and fails for most video containers, which is the
//! expected outcome that sends the selector on to the next strategy.

use std::io::{Cursor, ErrorKind};

use async_trait::async_trait;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{
    buffer::AudioBuffer,
    encoder::is_mp3_sample_rate,
    error::StrategyError,
    input::VideoInput,
    progress::CancellationToken,
    strategy::{Extracted, ExtractionStrategy, StrategyContext},
};

/// Strategy 2: decode the input bytes as an audio container.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerDecodeStrategy;

impl ContainerDecodeStrategy {
    /// Name used in logs and traces.
    pub const NAME: &'static str = "container-decode";

    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionStrategy for ContainerDecodeStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(
        &self,
        input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Extracted, StrategyError> {
        let input = input.clone();
        let cancellation = context.cancellation.clone();
        context.report(1, 4, "Decoding container");

        let buffer = tokio::task::spawn_blocking(move || decode_container(&input, &cancellation))
            .await
            .map_err(|error| StrategyError::Decode(format!("decode task failed: {error}")))??;

        if !is_mp3_sample_rate(buffer.sample_rate()) {
            return Err(StrategyError::Decode(format!(
                "sample rate {} Hz cannot be carried by MP3",
                buffer.sample_rate()
            )));
        }
        context.report(4, 4, "Container decoded");
        Ok(Extracted::Pcm(buffer))
    }
}

/// Decode the first audio track of `input` into an [`AudioBuffer`].
///
/// More than two channels are reduced to the front pair. Corrupt packets
/// are skipped.
///
/// # Errors
///
/// Returns [`StrategyError::Decode`] if the bytes are not a recognised audio
/// container or contain no samples, [`StrategyError::NoAudioTrack`] if no
/// decodable track exists, and [`StrategyError::Cancelled`] if the token
/// fires.
pub fn decode_container(
    input: &VideoInput,
    cancellation: &CancellationToken,
) -> Result<AudioBuffer, StrategyError> {
    let cursor = Cursor::new(input.shared_data());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = input.extension() {
        hint.with_extension(&extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|error| StrategyError::Decode(format!("probe: {error}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(StrategyError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| StrategyError::Decode("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|error| StrategyError::Decode(format!("codec: {error}")))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channel_count = codec_params.channels.map(|channels| channels.count()).unwrap_or(0);

    loop {
        if cancellation.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(error) => return Err(StrategyError::Decode(format!("packet: {error}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(error)) => {
                log::debug!("Skipping corrupt packet: {error}");
                continue;
            }
            Err(error) => return Err(StrategyError::Decode(format!("decode: {error}"))),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        channel_count = spec.channels.count();

        let mut samples = SampleBuffer::<f32>::new(frames as u64, spec);
        samples.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(samples.samples());
    }

    if interleaved.is_empty() || channel_count == 0 {
        return Err(StrategyError::Decode("no audio samples decoded".to_string()));
    }

    let buffer = AudioBuffer::from_interleaved(sample_rate, channel_count, &interleaved)
        .map_err(|error| StrategyError::Decode(error.to_string()))?;
    log::debug!(
        "Decoded {} samples x {} channel(s) at {sample_rate} Hz from the container",
        buffer.frames(),
        buffer.channel_count()
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
        let data_len = frames * u32::from(channels) * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16_u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for frame in 0..frames {
            let value = if frame % 2 == 0 { 8192_i16 } else { -8192_i16 };
            for _ in 0..channels {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn wav_bytes_decode_to_pcm() {
        let input = VideoInput::new(wav(44_100, 2, 4410), "tone.wav", "audio/wav");
        let buffer = decode_container(&input, &CancellationToken::new()).unwrap();
        assert_eq!(buffer.sample_rate(), 44_100);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 4410);
        let first = buffer.channel(0).unwrap()[0];
        assert!((first - 0.25).abs() < 1e-3);
    }

    #[test]
    fn unrecognised_bytes_fail_to_decode() {
        let input = VideoInput::new(vec![0x42_u8; 512], "clip.mp4", "video/mp4");
        let result = decode_container(&input, &CancellationToken::new());
        assert!(matches!(result, Err(StrategyError::Decode(_))));
    }

    #[test]
    fn cancelled_token_stops_decoding() {
        let token = CancellationToken::new();
        token.cancel();
        let input = VideoInput::new(wav(8_000, 1, 800), "tone.wav", "audio/wav");
        assert!(matches!(decode_container(&input, &token), Err(StrategyError::Cancelled)));
    }

    #[tokio::test]
    async fn unsupported_sample_rate_falls_through() {
        let input = VideoInput::new(wav(96_000, 1, 960), "hi-res.wav", "audio/wav");
        let context = StrategyContext::new(
            std::sync::Arc::new(crate::progress::ProgressTracker::silent()),
            crate::configuration::CaptureOptions::new(),
        );
        let result = ContainerDecodeStrategy::new().extract(&input, &context).await;
        assert!(matches!(result, Err(StrategyError::Decode(message)) if message.contains("96000")));
    }
}
