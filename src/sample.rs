//! Float to 16-bit PCM sample conversion.
//!
//! Out-of-range input saturates silently; it is never reported as an error.

/// Convert one normalised sample to signed 16-bit PCM.
///
/// Computes `round(clamp(s, -1.0, 1.0) * 32768)` and clamps the result to
/// `[-32768, 32767]`, so `-1.0` maps to `-32768` and `1.0` to `32767`.
/// `NaN` maps to silence.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * 32768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert a block of normalised samples.
pub fn convert_block(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(to_pcm16).collect()
}

/// Convert a block into an existing buffer, reusing its allocation.
pub fn convert_block_into(samples: &[f32], output: &mut Vec<i16>) {
    output.clear();
    output.extend(samples.iter().copied().map(to_pcm16));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(-1.0), -32768);
        assert_eq!(to_pcm16(0.0), 0);
    }

    #[test]
    fn saturates_outside_unit_range() {
        assert_eq!(to_pcm16(3.5), 32767);
        assert_eq!(to_pcm16(-12.0), -32768);
        assert_eq!(to_pcm16(f32::INFINITY), 32767);
        assert_eq!(to_pcm16(f32::NEG_INFINITY), -32768);
        assert_eq!(to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn rounds_to_nearest() {
        // 0.5 / 32768 rounds away from zero to 1.
        assert_eq!(to_pcm16(0.5 / 32768.0), 1);
        assert_eq!(to_pcm16(0.25), 8192);
        assert_eq!(to_pcm16(-0.25), -8192);
    }

    #[test]
    fn block_into_reuses_buffer() {
        let mut out = vec![7_i16; 10];
        convert_block_into(&[0.0, 1.0], &mut out);
        assert_eq!(out, vec![0, 32767]);
    }
}
