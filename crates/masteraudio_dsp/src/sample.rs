//! PCM sample conversion
//!
//! All byte layouts are little-endian. Integer formats map to `[-1.0, 1.0)`
//! on decode and are clamped on encode, so out-of-range mixer output
//! saturates instead of wrapping.

use crate::descriptor::SampleType;
use crate::error::{DspError, DspResult};

const I16_SCALE: f32 = 32768.0;
const I24_SCALE: f32 = 8_388_608.0;
const I32_SCALE: f64 = 2_147_483_648.0;

/// Decode every whole sample in `bytes` into `out` (cleared first)
pub fn decode_samples(bytes: &[u8], sample_type: SampleType, out: &mut Vec<f32>) {
    out.clear();
    let width = sample_type.bytes();
    out.reserve(bytes.len() / width);
    for chunk in bytes.chunks_exact(width) {
        let value = match sample_type {
            SampleType::Int16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / I16_SCALE,
            SampleType::Int24 => {
                // Sign-extend by placing the 24 bits in the top of an i32
                let raw = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                raw as f32 / I24_SCALE
            }
            SampleType::Int32 => {
                let raw = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (raw as f64 / I32_SCALE) as f32
            }
            SampleType::Float32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        };
        out.push(value);
    }
}

/// Encode `samples` into the front of `out`, returning the bytes written
pub fn encode_samples(samples: &[f32], sample_type: SampleType, out: &mut [u8]) -> DspResult<usize> {
    let width = sample_type.bytes();
    let needed = samples.len() * width;
    if out.len() < needed {
        return Err(DspError::BufferTooSmall {
            needed,
            actual: out.len(),
        });
    }

    for (sample, dst) in samples.iter().zip(out.chunks_exact_mut(width)) {
        let v = sample.clamp(-1.0, 1.0);
        match sample_type {
            SampleType::Int16 => {
                let raw = (v * I16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                dst.copy_from_slice(&raw.to_le_bytes());
            }
            SampleType::Int24 => {
                let raw = (v * I24_SCALE).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                dst.copy_from_slice(&raw.to_le_bytes()[..3]);
            }
            SampleType::Int32 => {
                let raw = (v as f64 * I32_SCALE)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                dst.copy_from_slice(&raw.to_le_bytes());
            }
            SampleType::Float32 => dst.copy_from_slice(&sample.to_le_bytes()),
        }
    }
    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int16_decode() {
        let bytes = [0x00, 0x80, 0xFF, 0x7F, 0x00, 0x00];
        let mut out = Vec::new();
        decode_samples(&bytes, SampleType::Int16, &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], -1.0);
        assert!((out[1] - 1.0).abs() < 1e-4);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_int24_sign_extension() {
        // -1 in 24-bit two's complement
        let bytes = [0xFF, 0xFF, 0xFF];
        let mut out = Vec::new();
        decode_samples(&bytes, SampleType::Int24, &mut out);
        assert!(out[0] < 0.0 && out[0] > -1e-5);
    }

    #[test]
    fn test_encode_clamps() {
        let mut out = [0u8; 4];
        encode_samples(&[2.0, -3.0], SampleType::Int16, &mut out).unwrap();
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MIN);
    }

    #[test]
    fn test_integer_formats_are_stable() {
        // Formats that fit in an f32 mantissa survive decode then encode exactly
        for sample_type in [SampleType::Int16, SampleType::Int24] {
            let width = sample_type.bytes();
            let mut bytes = vec![0u8; width * 4];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = (i * 37 % 251) as u8;
            }
            let mut samples = Vec::new();
            decode_samples(&bytes, sample_type, &mut samples);
            let mut again = vec![0u8; bytes.len()];
            encode_samples(&samples, sample_type, &mut again).unwrap();
            assert_eq!(bytes, again, "{sample_type:?}");
        }
    }

    #[test]
    fn test_buffer_too_small() {
        let mut out = [0u8; 3];
        let err = encode_samples(&[0.0, 0.0], SampleType::Int16, &mut out).unwrap_err();
        assert_eq!(err, DspError::BufferTooSmall { needed: 4, actual: 3 });
    }

    #[test]
    fn test_partial_trailing_sample_ignored() {
        let mut out = Vec::new();
        decode_samples(&[0, 0, 0], SampleType::Int16, &mut out);
        assert_eq!(out.len(), 1);
    }
}
