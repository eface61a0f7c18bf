//! Block-wise MP3 encoding.
//!
//! [`FrameEncoder`] partitions an [`AudioBuffer`] into 1152-sample blocks,
//! converts each block to 16-bit PCM, and hands it to an [`Mp3Primitive`].
//! The primitive is opened by an [`EncoderBackend`]; [`LameBackend`] is the
//! production backend, built on FFmpeg's `libmp3lame` wrapper.
//!
//! The encoder honours the backend's native channel support: mono buffers
//! are encoded in single-channel mode when the backend offers it and are
//! duplicated into both channels of a stereo stream otherwise.

use std::sync::Arc;

use ffmpeg_next::{
    ChannelLayout, Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    encoder::Audio as AudioEncoder,
    format::{Sample, sample::Type as SampleType},
    frame::Audio as AudioFrame,
    util::error::EAGAIN,
};

use crate::{
    buffer::AudioBuffer,
    configuration::EncoderOptions,
    error::EncodingError,
    progress::CancellationToken,
    sample::convert_block_into,
};

/// Samples per channel in one MP3 frame (one granule pair).
pub const MP3_BLOCK_SIZE: usize = 1152;

/// Sample rates an MPEG-1/2/2.5 Layer III stream can carry.
pub const MP3_SAMPLE_RATES: [u32; 9] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000,
];

/// Returns `true` if MP3 can carry `sample_rate` without resampling.
pub fn is_mp3_sample_rate(sample_rate: u32) -> bool {
    MP3_SAMPLE_RATES.contains(&sample_rate)
}

/// Number of block-encode calls needed for `frames` samples per channel.
pub fn block_count(frames: usize) -> usize {
    frames.div_ceil(MP3_BLOCK_SIZE)
}

/// One chunk of MP3 bitstream, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Position in the output sequence.
    pub index: usize,
    /// Bitstream bytes. Never empty.
    pub bytes: Vec<u8>,
}

/// Parameters a primitive is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channels the primitive will receive (1 or 2).
    pub channels: usize,
    /// Constant bitrate in kbit/s.
    pub bitrate_kbps: u32,
}

/// The underlying frame-encoding primitive.
///
/// `encode_block` may return an empty vector while the primitive buffers
/// internally. `flush` is called exactly once, after the last block.
pub trait Mp3Primitive: Send {
    /// Encode one block. `right` is `None` in single-channel mode.
    fn encode_block(
        &mut self,
        left: &[i16],
        right: Option<&[i16]>,
    ) -> Result<Vec<u8>, EncodingError>;

    /// Emit whatever is still buffered.
    fn flush(&mut self) -> Result<Vec<u8>, EncodingError>;
}

/// Opens primitives.
pub trait EncoderBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the primitive can encode a single channel natively.
    fn supports_mono(&self) -> bool;

    /// Open a primitive for the given parameters.
    fn open(&self, spec: &EncoderSpec) -> Result<Box<dyn Mp3Primitive>, EncodingError>;
}

/// Drives a primitive over an [`AudioBuffer`] in fixed-size blocks.
#[derive(Clone)]
pub struct FrameEncoder {
    backend: Arc<dyn EncoderBackend>,
    options: EncoderOptions,
}

impl FrameEncoder {
    /// Create an encoder over `backend` with a fixed bitrate.
    pub fn new(backend: Arc<dyn EncoderBackend>, options: EncoderOptions) -> Self {
        Self { backend, options }
    }

    /// The configured bitrate in kbit/s.
    pub fn bitrate_kbps(&self) -> u32 {
        self.options.bitrate_kbps
    }

    /// Encode `buffer` into an ordered sequence of non-empty frames.
    ///
    /// `on_block` is called after every block with `(blocks_done, total)`.
    /// The token is checked before each block.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Cancelled`] if the token fires, or any error
    /// the primitive reports.
    pub fn encode<F>(
        &self,
        buffer: &AudioBuffer,
        cancellation: &CancellationToken,
        mut on_block: F,
    ) -> Result<Vec<EncodedFrame>, EncodingError>
    where
        F: FnMut(usize, usize),
    {
        let source_channels = buffer.channel_count();
        let mono_native = source_channels == 1 && self.backend.supports_mono();
        let spec = EncoderSpec {
            sample_rate: buffer.sample_rate(),
            channels: if mono_native { 1 } else { 2 },
            bitrate_kbps: self.options.bitrate_kbps,
        };

        log::debug!(
            "Encoding {} samples x {} channel(s) at {} Hz with {} ({} kbit/s, {} mode)",
            buffer.frames(),
            source_channels,
            spec.sample_rate,
            self.backend.name(),
            spec.bitrate_kbps,
            if spec.channels == 1 { "mono" } else { "stereo" },
        );

        let mut primitive = self.backend.open(&spec)?;

        let left = buffer.channel(0).unwrap_or_default();
        let right = if source_channels == 2 { buffer.channel(1) } else { None };

        let total = block_count(buffer.frames());
        let mut frames = Vec::with_capacity(total + 1);
        let mut left_pcm = Vec::with_capacity(MP3_BLOCK_SIZE);
        let mut right_pcm = Vec::with_capacity(MP3_BLOCK_SIZE);

        for (block, left_block) in left.chunks(MP3_BLOCK_SIZE).enumerate() {
            if cancellation.is_cancelled() {
                return Err(EncodingError::Cancelled);
            }

            convert_block_into(left_block, &mut left_pcm);
            let chunk = match (right, spec.channels) {
                (Some(right), _) => {
                    let start = block * MP3_BLOCK_SIZE;
                    convert_block_into(&right[start..start + left_block.len()], &mut right_pcm);
                    primitive.encode_block(&left_pcm, Some(&right_pcm))?
                }
                (None, 1) => primitive.encode_block(&left_pcm, None)?,
                (None, _) => primitive.encode_block(&left_pcm, Some(&left_pcm))?,
            };

            push_frame(&mut frames, chunk);
            on_block(block + 1, total);
        }

        push_frame(&mut frames, primitive.flush()?);

        log::debug!("Encoded {total} blocks into {} frames", frames.len());
        Ok(frames)
    }

    /// Encode `buffer` and concatenate the frames into one bitstream.
    pub fn encode_to_vec<F>(
        &self,
        buffer: &AudioBuffer,
        cancellation: &CancellationToken,
        on_block: F,
    ) -> Result<Vec<u8>, EncodingError>
    where
        F: FnMut(usize, usize),
    {
        let frames = self.encode(buffer, cancellation, on_block)?;
        let size = frames.iter().map(|frame| frame.bytes.len()).sum();
        let mut output = Vec::with_capacity(size);
        for frame in frames {
            output.extend_from_slice(&frame.bytes);
        }
        Ok(output)
    }
}

fn push_frame(frames: &mut Vec<EncodedFrame>, bytes: Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    let index = frames.len();
    frames.push(EncodedFrame { index, bytes });
}

/// The `libmp3lame` encoder exposed by the linked FFmpeg build.
#[derive(Debug, Clone, Copy, Default)]
pub struct LameBackend;

impl LameBackend {
    /// FFmpeg's registered name for the encoder.
    pub const CODEC_NAME: &'static str = "libmp3lame";

    /// Create the backend.
    pub fn new() -> Self {
        Self
    }

    /// Returns `true` if the linked FFmpeg was built with `libmp3lame`.
    pub fn is_available() -> bool {
        crate::ffmpeg::encoder_available(Self::CODEC_NAME)
    }
}

impl EncoderBackend for LameBackend {
    fn name(&self) -> &str {
        Self::CODEC_NAME
    }

    fn supports_mono(&self) -> bool {
        true
    }

    fn open(&self, spec: &EncoderSpec) -> Result<Box<dyn Mp3Primitive>, EncodingError> {
        Ok(Box::new(LamePrimitive::open(spec)?))
    }
}

/// An opened `libmp3lame` context fed with planar 16-bit frames.
///
/// At the MPEG-2/2.5 rates (24 kHz and below) LAME works on 576-sample
/// frames and rejects anything longer, so each block is sent in pieces of
/// at most the context's frame size.
struct LamePrimitive {
    encoder: AudioEncoder,
    layout: ChannelLayout,
    channels: usize,
    sample_rate: u32,
    frame_size: usize,
    samples_sent: i64,
    packet: Packet,
}

impl LamePrimitive {
    fn open(spec: &EncoderSpec) -> Result<Self, EncodingError> {
        crate::ffmpeg::init().map_err(|error| EncodingError::Unavailable(error.to_string()))?;

        if !is_mp3_sample_rate(spec.sample_rate) {
            return Err(EncodingError::UnsupportedSampleRate(spec.sample_rate));
        }

        let codec = ffmpeg_next::encoder::find_by_name(LameBackend::CODEC_NAME)
            .ok_or_else(|| EncodingError::Unavailable(LameBackend::CODEC_NAME.to_string()))?;

        let planar_i16 = Sample::I16(SampleType::Planar);
        let accepts_planar_i16 = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .is_none_or(|mut formats| formats.any(|format| format == planar_i16));
        if !accepts_planar_i16 {
            return Err(EncodingError::Unavailable(format!(
                "{} does not accept planar 16-bit input",
                LameBackend::CODEC_NAME
            )));
        }

        let layout = if spec.channels == 1 { ChannelLayout::MONO } else { ChannelLayout::STEREO };

        let mut context = CodecContext::new().encoder().audio()?;
        context.set_rate(spec.sample_rate as i32);
        context.set_channel_layout(layout);
        context.set_format(planar_i16);
        context.set_bit_rate(spec.bitrate_kbps as usize * 1000);
        context.set_time_base(Rational(1, spec.sample_rate as i32));

        let encoder = context.open_as(codec)?;
        let frame_size = match encoder.frame_size() as usize {
            0 => MP3_BLOCK_SIZE,
            size => size.min(MP3_BLOCK_SIZE),
        };

        log::debug!(
            "Opened {} at {} Hz with {frame_size}-sample frames",
            LameBackend::CODEC_NAME,
            spec.sample_rate
        );

        Ok(Self {
            encoder,
            layout,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            frame_size,
            samples_sent: 0,
            packet: Packet::empty(),
        })
    }

    fn send(&mut self, left: &[i16], right: &[i16]) -> Result<(), EncodingError> {
        let samples = left.len();
        let mut frame = AudioFrame::new(Sample::I16(SampleType::Planar), samples, self.layout);
        frame.set_rate(self.sample_rate);
        frame.set_pts(Some(self.samples_sent));

        frame.plane_mut::<i16>(0)[..samples].copy_from_slice(left);
        if self.channels == 2 {
            frame.plane_mut::<i16>(1)[..samples].copy_from_slice(&right[..samples]);
        }

        self.samples_sent += samples as i64;
        self.encoder.send_frame(&frame)?;
        Ok(())
    }

    fn drain(&mut self, bytes: &mut Vec<u8>) -> Result<(), EncodingError> {
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    if let Some(data) = self.packet.data() {
                        bytes.extend_from_slice(data);
                    }
                }
                Err(FfmpegError::Eof) => return Ok(()),
                Err(FfmpegError::Other { errno }) if errno == EAGAIN => return Ok(()),
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl Mp3Primitive for LamePrimitive {
    fn encode_block(
        &mut self,
        left: &[i16],
        right: Option<&[i16]>,
    ) -> Result<Vec<u8>, EncodingError> {
        let right = right.unwrap_or(left);
        let mut bytes = Vec::new();
        let mut start = 0;
        while start < left.len() {
            let end = (start + self.frame_size).min(left.len());
            self.send(&left[start..end], &right[start..end])?;
            self.drain(&mut bytes)?;
            start = end;
        }
        Ok(bytes)
    }

    fn flush(&mut self) -> Result<Vec<u8>, EncodingError> {
        self.encoder.send_eof()?;
        let mut bytes = Vec::new();
        self.drain(&mut bytes)?;
        Ok(bytes)
    }
}
