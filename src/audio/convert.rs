//! Sample conversion between the wire format (i16 LE) and cpal's f32

use bytes::BufMut;

/// Convert one f32 sample in [-1.0, 1.0] to i16, clamping out-of-range input
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Append f32 samples to `out` as little-endian i16
pub fn f32_to_pcm_bytes(samples: &[f32], out: &mut impl BufMut) {
    for &sample in samples {
        out.put_i16_le(f32_to_i16(sample));
    }
}

/// Decode little-endian i16 PCM into f32, applying `gain`.
///
/// Writes `min(pcm.len() / 2, out.len())` samples and returns that count.
pub fn pcm_bytes_to_f32(pcm: &[u8], gain: f32, out: &mut [f32]) -> usize {
    let count = (pcm.len() / 2).min(out.len());
    for (i, slot) in out.iter_mut().take(count).enumerate() {
        let sample = i16::from_le_bytes([pcm[2 * i], pcm[2 * i + 1]]);
        *slot = i16_to_f32(sample) * gain;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_clamping() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        let mut buf = BytesMut::new();
        f32_to_pcm_bytes(&[1.0], &mut buf);
        assert_eq!(&buf[..], &i16::MAX.to_le_bytes());
    }

    #[test]
    fn test_gain_applied() {
        let pcm = 16384i16.to_le_bytes();
        let mut out = [0.0f32; 4];
        assert_eq!(pcm_bytes_to_f32(&pcm, 0.5, &mut out), 1);
        assert!((out[0] - 0.25).abs() < 1e-6);

        assert_eq!(pcm_bytes_to_f32(&pcm, 0.0, &mut out), 1);
        assert_eq!(out[0], 0.0);
    }
}
