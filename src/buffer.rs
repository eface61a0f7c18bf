//! Decoded PCM audio.

use crate::error::EncodingError;

/// Decoded, normalised PCM audio produced by an extraction strategy.
///
/// Holds one sample sequence per channel. The constructors enforce the
/// invariants: a positive sample rate, one or two channels, and identical
/// sample counts across channels.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a buffer from per-channel samples.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::InvalidBuffer`] if the sample rate is zero,
    /// the channel count is not 1 or 2, or the channels differ in length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, EncodingError> {
        if sample_rate == 0 {
            return Err(EncodingError::InvalidBuffer("sample rate must be positive".to_string()));
        }
        if channels.is_empty() || channels.len() > 2 {
            return Err(EncodingError::InvalidBuffer(format!(
                "expected 1 or 2 channels, got {}",
                channels.len()
            )));
        }
        let frames = channels[0].len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(EncodingError::InvalidBuffer(
                "channels have different sample counts".to_string(),
            ));
        }
        Ok(Self { sample_rate, channels })
    }

    /// A single-channel buffer.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self, EncodingError> {
        Self::new(sample_rate, vec![samples])
    }

    /// A two-channel buffer.
    pub fn stereo(
        sample_rate: u32,
        left: Vec<f32>,
        right: Vec<f32>,
    ) -> Result<Self, EncodingError> {
        Self::new(sample_rate, vec![left, right])
    }

    /// Split interleaved samples into channels.
    ///
    /// More than two source channels are reduced to the first two (front
    /// left and right).
    pub fn from_interleaved(
        sample_rate: u32,
        channel_count: usize,
        interleaved: &[f32],
    ) -> Result<Self, EncodingError> {
        if channel_count == 0 {
            return Err(EncodingError::InvalidBuffer("zero channels".to_string()));
        }
        let kept = channel_count.min(2);
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); kept];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, samples) in channels.iter_mut().enumerate() {
                samples.push(frame[channel]);
            }
        }
        Self::new(sample_rate, channels)
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels (1 or 2).
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Returns `true` when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playback length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}
