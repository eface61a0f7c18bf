//! Capture-and-record extraction.
//!
//! Plays the video's audio track through FFmpeg, records it into the first
//! supported recording format, then decodes the recording back to PCM. The
//! recording is bounded by the media duration plus a grace period; past that
//! deadline it is stopped and the attempt fails as timed out.
//!
//! All scratch state lives in a [`CaptureSession`] that is dropped before
//! the strategy returns, whatever the outcome.

use std::{
    io::Write,
    path::Path,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use ffmpeg_next::{
    ChannelLayout, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::Audio as AudioDecoder,
    encoder::Audio as AudioEncoder,
    format::{Flags as FormatFlags, Sample, context::Output, sample::Type as SampleType},
    frame::Audio as AudioFrame,
    media::Type as MediaType,
    software::resampling::Context as ResamplingContext,
};
use tempfile::NamedTempFile;

use crate::{
    buffer::AudioBuffer,
    error::StrategyError,
    input::VideoInput,
    progress::CancellationToken,
    strategy::{Extracted, ExtractionStrategy, StrategyContext},
};

/// Microseconds per second, FFmpeg's `AV_TIME_BASE`.
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Bitrate of the intermediate recording.
const RECORDING_BIT_RATE: usize = 128_000;

/// Largest chunk handed to an encoder that accepts any frame size.
const VARIABLE_FRAME_CHUNK: usize = 4096;

/// A container/codec pair the capture can record into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingFormat {
    /// MIME-style label, e.g. `audio/webm;codecs=opus`.
    pub label: &'static str,
    /// FFmpeg muxer name.
    pub muxer: &'static str,
    /// FFmpeg encoder name.
    pub encoder: &'static str,
    /// File extension for the scratch recording.
    pub extension: &'static str,
}

/// Recording formats in preference order.
pub const RECORDING_FORMATS: [RecordingFormat; 5] = [
    RecordingFormat {
        label: "audio/webm;codecs=opus",
        muxer: "webm",
        encoder: "libopus",
        extension: "webm",
    },
    RecordingFormat {
        label: "audio/webm;codecs=vorbis",
        muxer: "webm",
        encoder: "libvorbis",
        extension: "webm",
    },
    RecordingFormat {
        label: "audio/ogg;codecs=opus",
        muxer: "ogg",
        encoder: "libopus",
        extension: "ogg",
    },
    RecordingFormat {
        label: "audio/mp4",
        muxer: "adts",
        encoder: "aac",
        extension: "aac",
    },
    RecordingFormat {
        label: "audio/mpeg",
        muxer: "mp3",
        encoder: "libmp3lame",
        extension: "mp3",
    },
];

/// Pick the first candidate that passes `is_supported`.
pub fn select_recording_format<F>(
    candidates: &[RecordingFormat],
    is_supported: F,
) -> Option<RecordingFormat>
where
    F: Fn(&RecordingFormat) -> bool,
{
    candidates.iter().copied().find(|format| is_supported(format))
}

/// Capability probe: the linked FFmpeg has both the encoder and the muxer.
pub fn recording_supported(format: &RecordingFormat) -> bool {
    crate::ffmpeg::encoder_available(format.encoder) && crate::ffmpeg::muxer_available(format.muxer)
}

/// Strategy 1: record the audio track and decode the recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCaptureStrategy;

impl StreamCaptureStrategy {
    /// Name used in logs and traces.
    pub const NAME: &'static str = "stream-capture";

    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionStrategy for StreamCaptureStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self) -> Result<(), StrategyError> {
        crate::ffmpeg::init()
            .map_err(|error| StrategyError::Unsupported(format!("FFmpeg ({error})")))
    }

    async fn extract(
        &self,
        input: &VideoInput,
        context: &StrategyContext,
    ) -> Result<Extracted, StrategyError> {
        let input = input.clone();
        let context = context.clone();
        let buffer = tokio::task::spawn_blocking(move || capture_blocking(&input, &context))
            .await
            .map_err(|error| StrategyError::Record(format!("capture task failed: {error}")))??;
        Ok(Extracted::Pcm(buffer))
    }
}

/// Scratch files and timing for one capture. Released on drop.
struct CaptureSession {
    source: NamedTempFile,
    recording: Option<NamedTempFile>,
    started: Instant,
}

impl CaptureSession {
    fn open(input: &VideoInput) -> Result<Self, StrategyError> {
        let suffix = input.extension().map(|extension| format!(".{extension}")).unwrap_or_default();
        let mut source = tempfile::Builder::new()
            .prefix("mp3drop-source-")
            .suffix(&suffix)
            .tempfile()?;
        source.write_all(input.data())?;
        source.flush()?;
        Ok(Self {
            source,
            recording: None,
            started: Instant::now(),
        })
    }

    fn recording_file(&mut self, format: &RecordingFormat) -> Result<&Path, StrategyError> {
        let file = tempfile::Builder::new()
            .prefix("mp3drop-recording-")
            .suffix(&format!(".{}", format.extension))
            .tempfile()?;
        Ok(self.recording.insert(file).path())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        log::debug!(
            "Released capture session after {:?} (recording: {})",
            self.started.elapsed(),
            self.recording.is_some()
        );
    }
}

fn capture_blocking(
    input: &VideoInput,
    context: &StrategyContext,
) -> Result<AudioBuffer, StrategyError> {
    crate::ffmpeg::init()?;
    let mut session = CaptureSession::open(input)?;
    let source_path = session.source.path().to_path_buf();

    let source = ffmpeg_next::format::input(&source_path)?;
    let stream = source.streams().best(MediaType::Audio).ok_or(StrategyError::NoAudioTrack)?;
    let duration = media_duration(&source, stream.duration(), stream.time_base());
    if duration.is_zero() {
        return Err(StrategyError::NoDuration);
    }
    drop(source);

    let format = select_recording_format(&context.capture.recording_formats, recording_supported)
        .ok_or(StrategyError::NoRecordingFormat)?;
    let limit = duration + context.capture.grace_period;
    log::debug!(
        "Recording {:.1}s of audio as {} (deadline {limit:?})",
        duration.as_secs_f64(),
        format.label
    );

    let recording_path = session.recording_file(&format)?.to_path_buf();
    record(&source_path, &recording_path, &format, duration, limit, context)?;

    context.report(9, 10, "Decoding recording");
    let buffer = decode_file(&recording_path, context.capture.sample_rate, &context.cancellation)?;
    log::debug!(
        "Decoded recording: {} samples x {} channel(s)",
        buffer.frames(),
        buffer.channel_count()
    );
    Ok(buffer)
}

fn media_duration(
    source: &ffmpeg_next::format::context::Input,
    stream_duration: i64,
    time_base: Rational,
) -> Duration {
    let container = source.duration() as f64 / AV_TIME_BASE;
    let seconds = if container > 0.0 {
        container
    } else {
        stream_duration as f64 * f64::from(time_base)
    };
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Open an audio decoder for the best audio stream of `input`.
fn open_audio_decoder(
    input: &ffmpeg_next::format::context::Input,
) -> Result<(usize, Rational, AudioDecoder), StrategyError> {
    let stream = input.streams().best(MediaType::Audio).ok_or(StrategyError::NoAudioTrack)?;
    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .audio()
        .map_err(|error| StrategyError::Decode(format!("cannot open audio decoder: {error}")))?;
    Ok((stream.index(), stream.time_base(), decoder))
}

fn output_layout(decoder: &AudioDecoder) -> (ChannelLayout, usize) {
    if decoder.channels() >= 2 {
        (ChannelLayout::STEREO, 2)
    } else {
        (ChannelLayout::MONO, 1)
    }
}

/// Resample one decoded frame into a freshly allocated output frame large
/// enough for the rate change.
fn resample(
    resampler: &mut ResamplingContext,
    decoded: &AudioFrame,
    format: Sample,
    layout: ChannelLayout,
    input_rate: u32,
    output_rate: u32,
) -> Result<AudioFrame, ffmpeg_next::Error> {
    let capacity = decoded.samples() * output_rate as usize / input_rate.max(1) as usize + 64;
    let mut output = AudioFrame::new(format, capacity, layout);
    output.set_rate(output_rate);
    resampler.run(decoded, &mut output)?;
    Ok(output)
}

/// Byte-level sample FIFO that re-chunks resampled audio to the encoder's
/// frame size.
struct SampleFifo {
    planes: Vec<Vec<u8>>,
    stride: usize,
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

impl SampleFifo {
    fn new(format: Sample, layout: ChannelLayout, channels: usize, rate: u32) -> Self {
        let (plane_count, stride) = if format.is_planar() {
            (channels, format.bytes())
        } else {
            (1, format.bytes() * channels)
        };
        Self {
            planes: vec![Vec::new(); plane_count],
            stride,
            format,
            layout,
            rate,
        }
    }

    fn len(&self) -> usize {
        self.planes[0].len() / self.stride
    }

    fn push(&mut self, frame: &AudioFrame) {
        let bytes = frame.samples() * self.stride;
        if bytes == 0 {
            return;
        }
        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.extend_from_slice(&frame.data(index)[..bytes]);
        }
    }

    /// Pop exactly `size` samples, zero-padding when `pad` is set and fewer
    /// are buffered.
    fn pop(&mut self, size: usize, pad: bool) -> Option<AudioFrame> {
        let available = self.len();
        if available == 0 || (available < size && !pad) {
            return None;
        }
        let taken = available.min(size);
        let mut frame = AudioFrame::new(self.format, size, self.layout);
        frame.set_rate(self.rate);
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let target = &mut frame.data_mut(index)[..size * self.stride];
            let copied = taken * self.stride;
            target[..copied].copy_from_slice(&plane[..copied]);
            target[copied..].fill(0);
            plane.drain(..copied);
        }
        Some(frame)
    }
}

/// An opened recording encoder plus its output stream bookkeeping.
struct Recorder {
    encoder: AudioEncoder,
    fifo: SampleFifo,
    frame_size: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    samples_written: i64,
    packet: Packet,
}

impl Recorder {
    fn open(
        output: &mut Output,
        format: &RecordingFormat,
        layout: ChannelLayout,
        channels: usize,
        preferred_rate: u32,
    ) -> Result<(Self, Sample, u32), StrategyError> {
        let codec = ffmpeg_next::encoder::find_by_name(format.encoder)
            .ok_or_else(|| StrategyError::Unsupported(format!("{} encoder", format.encoder)))?;
        let audio_codec = codec.audio().map_err(|error| StrategyError::Record(error.to_string()))?;

        let sample_format = audio_codec
            .formats()
            .and_then(|mut formats| formats.next())
            .unwrap_or(Sample::F32(SampleType::Planar));
        let rate = match audio_codec.rates() {
            Some(rates) => {
                let rates: Vec<u32> = rates.map(|rate| rate as u32).collect();
                if rates.contains(&preferred_rate) {
                    preferred_rate
                } else {
                    rates.first().copied().unwrap_or(preferred_rate)
                }
            }
            None => preferred_rate,
        };
        let variable_frames = codec
            .capabilities()
            .contains(ffmpeg_next::codec::Capabilities::VARIABLE_FRAME_SIZE);

        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);
        let encoder_time_base = Rational(1, rate as i32);

        let mut context = CodecContext::new_with_codec(codec).encoder().audio()?;
        context.set_rate(rate as i32);
        context.set_channel_layout(layout);
        context.set_format(sample_format);
        context.set_bit_rate(RECORDING_BIT_RATE);
        context.set_time_base(encoder_time_base);
        if needs_global_header {
            // SAFETY: the context is not opened yet; only the flag word changes.
            unsafe {
                (*context.as_mut_ptr()).flags |=
                    ffmpeg_next::ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }
        let encoder = context
            .open_as(codec)
            .map_err(|error| {
                StrategyError::Record(format!("cannot open {}: {error}", format.encoder))
            })?;

        {
            let mut stream = output.add_stream(codec)?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
        }
        output
            .write_header()
            .map_err(|error| {
                StrategyError::Record(format!("cannot write {} header: {error}", format.muxer))
            })?;
        let stream_time_base = output
            .stream(0)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        let frame_size = match encoder.frame_size() as usize {
            0 => VARIABLE_FRAME_CHUNK,
            _ if variable_frames => VARIABLE_FRAME_CHUNK,
            size => size,
        };

        Ok((
            Self {
                encoder,
                fifo: SampleFifo::new(sample_format, layout, channels, rate),
                frame_size,
                encoder_time_base,
                stream_time_base,
                samples_written: 0,
                packet: Packet::empty(),
            },
            sample_format,
            rate,
        ))
    }

    fn write(&mut self, frame: &AudioFrame, output: &mut Output) -> Result<(), StrategyError> {
        self.fifo.push(frame);
        while let Some(chunk) = self.fifo.pop(self.frame_size, false) {
            self.encode(chunk, output)?;
        }
        Ok(())
    }

    fn encode(&mut self, mut chunk: AudioFrame, output: &mut Output) -> Result<(), StrategyError> {
        chunk.set_pts(Some(self.samples_written));
        self.samples_written += chunk.samples() as i64;
        self.encoder
            .send_frame(&chunk)
            .map_err(|error| StrategyError::Record(error.to_string()))?;
        self.drain(output)
    }

    fn drain(&mut self, output: &mut Output) -> Result<(), StrategyError> {
        while self.encoder.receive_packet(&mut self.packet).is_ok() {
            self.packet.set_stream(0);
            self.packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            self.packet
                .write_interleaved(output)
                .map_err(|error| StrategyError::Record(error.to_string()))?;
        }
        Ok(())
    }

    fn finish(mut self, output: &mut Output) -> Result<(), StrategyError> {
        while let Some(chunk) = self.fifo.pop(self.frame_size, true) {
            self.encode(chunk, output)?;
        }
        self.encoder
            .send_eof()
            .map_err(|error| StrategyError::Record(error.to_string()))?;
        self.drain(output)?;
        output
            .write_trailer()
            .map_err(|error| StrategyError::Record(error.to_string()))
    }
}

/// Stream the source's audio track into `recording_path`.
fn record(
    source_path: &Path,
    recording_path: &Path,
    format: &RecordingFormat,
    duration: Duration,
    limit: Duration,
    context: &StrategyContext,
) -> Result<(), StrategyError> {
    let started = Instant::now();
    let mut source = ffmpeg_next::format::input(&source_path)?;
    let (stream_index, time_base, mut decoder) = open_audio_decoder(&source)?;
    let (layout, channels) = output_layout(&decoder);

    let mut output = ffmpeg_next::format::output_as(&recording_path, format.muxer)
        .map_err(|error| {
            StrategyError::Record(format!("cannot create {} recording: {error}", format.muxer))
        })?;
    let (mut recorder, sample_format, rate) =
        Recorder::open(&mut output, format, layout, channels, context.capture.sample_rate)?;

    let mut resampler = ResamplingContext::get(
        decoder.format(),
        decoder.channel_layout(),
        decoder.rate(),
        sample_format,
        layout,
        rate,
    )
    .map_err(|error| StrategyError::Record(format!("cannot create resampler: {error}")))?;

    let total_ms = duration.as_millis() as u64;
    let mut decoded = AudioFrame::empty();

    for (stream, packet) in source.packets() {
        if context.cancellation.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }
        if started.elapsed() > limit {
            log::warn!("Recording exceeded {limit:?}; stopping");
            return Err(StrategyError::TimedOut(limit));
        }
        if stream.index() != stream_index {
            continue;
        }

        if let Some(pts) = packet.pts() {
            let position_ms = (pts as f64 * f64::from(time_base) * 1000.0).max(0.0) as u64;
            context.report(position_ms.min(total_ms) * 9 / 10, total_ms, "Recording audio");
        }

        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            let input_rate = decoder.rate();
            let resampled =
                resample(&mut resampler, &decoded, sample_format, layout, input_rate, rate)
                    .map_err(|error| StrategyError::Record(error.to_string()))?;
            recorder.write(&resampled, &mut output)?;
        }
    }

    decoder.send_eof()?;
    while decoder.receive_frame(&mut decoded).is_ok() {
        let input_rate = decoder.rate();
        let resampled = resample(&mut resampler, &decoded, sample_format, layout, input_rate, rate)
            .map_err(|error| StrategyError::Record(error.to_string()))?;
        recorder.write(&resampled, &mut output)?;
    }
    let mut tail = AudioFrame::new(sample_format, VARIABLE_FRAME_CHUNK, layout);
    tail.set_rate(rate);
    if resampler.flush(&mut tail).is_ok() && tail.samples() > 0 {
        recorder.write(&tail, &mut output)?;
    }

    recorder.finish(&mut output)?;
    log::debug!("Recording finished in {:?}", started.elapsed());
    Ok(())
}

/// Decode the best audio stream of a file to planar float PCM at `sample_rate`.
pub(crate) fn decode_file(
    path: &Path,
    sample_rate: u32,
    cancellation: &CancellationToken,
) -> Result<AudioBuffer, StrategyError> {
    let mut input = ffmpeg_next::format::input(&path)?;
    let (stream_index, _, mut decoder) = open_audio_decoder(&input)?;
    let (layout, channels) = output_layout(&decoder);
    let target = Sample::F32(SampleType::Planar);

    let mut resampler = ResamplingContext::get(
        decoder.format(),
        decoder.channel_layout(),
        decoder.rate(),
        target,
        layout,
        sample_rate,
    )
    .map_err(|error| StrategyError::Decode(format!("cannot create resampler: {error}")))?;

    let mut samples = vec![Vec::new(); channels];
    let mut decoded = AudioFrame::empty();
    let mut collect = |frame: &AudioFrame| {
        for (channel, output) in samples.iter_mut().enumerate() {
            output.extend_from_slice(&frame.plane::<f32>(channel)[..frame.samples()]);
        }
    };

    for (stream, packet) in input.packets() {
        if cancellation.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            let input_rate = decoder.rate();
            collect(&resample(&mut resampler, &decoded, target, layout, input_rate, sample_rate)?);
        }
    }
    decoder.send_eof()?;
    while decoder.receive_frame(&mut decoded).is_ok() {
        collect(&resample(&mut resampler, &decoded, target, layout, decoder.rate(), sample_rate)?);
    }
    let mut tail = AudioFrame::new(target, VARIABLE_FRAME_CHUNK, layout);
    tail.set_rate(sample_rate);
    if resampler.flush(&mut tail).is_ok() && tail.samples() > 0 {
        collect(&tail);
    }

    let buffer = AudioBuffer::new(sample_rate, samples)
        .map_err(|error| StrategyError::Decode(error.to_string()))?;
    if buffer.is_empty() {
        return Err(StrategyError::Decode("recording contains no samples".to_string()));
    }
    Ok(buffer)
}
