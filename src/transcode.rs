// transcode.rs — Converts raw capture units into transport-ready encodings.
//
// Audio: f32 samples → mono → target rate → signed 16-bit PCM.
// Frames: RGB bitmap → (optional downscale) → JPEG.
// Every transform here is a one-shot, per-chunk operation with no state.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GenericImageView};

use crate::types::StreamError;

// ─── Audio ─────────────────────────────────────────────────────────────────────

/// Quantize floating-point samples in [-1.0, 1.0] to signed 16-bit PCM.
///
/// Samples are clamped, then scaled asymmetrically: negative values by
/// 32768, non-negative by 32767, truncating toward zero. The backend
/// decodes with the same asymmetric scale, so this mapping is exact:
/// -1.0 → -32768, 0.0 → 0, 1.0 → 32767.
pub fn f32_to_pcm16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&x| {
            let s = x.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert a slice of i16 samples to raw little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Down-mix interleaved multi-channel audio to mono by averaging channels.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample audio using simple linear interpolation.
/// Good enough for speech; not audiophile-grade.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = ((input.len() as f64) / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < input.len() {
            input[idx] as f64 * (1.0 - frac) + input[idx + 1] as f64 * frac
        } else {
            input.get(idx).copied().unwrap_or(0.0) as f64
        };

        output.push(sample as f32);
    }

    output
}

/// RMS of PCM i16 samples, normalized to 0.0–1.0. Reported at debug level
/// per chunk so a silent microphone is diagnosable from the logs.
pub fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum / samples.len() as f64).sqrt() as f32 / i16::MAX as f32
}

// ─── Frames ────────────────────────────────────────────────────────────────────

/// Downscale a frame to `max_width` (preserving aspect ratio) if it is
/// wider, then JPEG-encode at the given quality. Returns the encoded
/// bytes plus the final dimensions.
pub fn encode_jpeg_frame(
    img: &DynamicImage,
    max_width: u32,
    quality: u8,
) -> Result<(Vec<u8>, u32, u32), StreamError> {
    let img = if img.width() > max_width {
        let ratio = max_width as f64 / img.width() as f64;
        let new_h = (img.height() as f64 * ratio).round() as u32;
        img.resize_exact(max_width, new_h.max(1), imageops::FilterType::Triangle)
    } else {
        img.clone()
    };

    let (w, h) = img.dimensions();

    let mut jpeg_buf: Vec<u8> = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, quality);
    encoder
        .encode(img.to_rgb8().as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| StreamError::Transcode(format!("jpeg encode: {e}")))?;

    Ok((jpeg_buf, w, h))
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn pcm16_boundary_values() {
        let samples = f32_to_pcm16(&[-1.0, 0.0, 1.0]);
        assert_eq!(samples, vec![-32768, 0, 32767]);
    }

    #[test]
    fn pcm16_near_full_scale_truncates() {
        // 0.99999 * 32767 = 32766.67… → truncates toward zero
        assert_eq!(f32_to_pcm16(&[0.99999])[0], 32766);
        assert_eq!(f32_to_pcm16(&[-0.99999])[0], -32767);
    }

    #[test]
    fn pcm16_uses_asymmetric_scale() {
        // Negative half-scale uses 32768, positive uses 32767.
        assert_eq!(f32_to_pcm16(&[-0.5])[0], -16384);
        assert_eq!(f32_to_pcm16(&[0.5])[0], 16383);
    }

    #[test]
    fn pcm16_clamps_out_of_range_input() {
        let samples = f32_to_pcm16(&[-2.5, 2.5]);
        assert_eq!(samples, vec![-32768, 32767]);
    }

    #[test]
    fn pcm16_roundtrip_within_one_lsb() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 / 500.0) - 1.0).collect();
        for (&x, &q) in input.iter().zip(f32_to_pcm16(&input).iter()) {
            let scale = if x < 0.0 { 32768.0 } else { 32767.0 };
            let back = q as f32 / scale;
            assert!(
                (back - x).abs() <= 1.0 / 32767.0,
                "sample {x} decoded to {back}"
            );
        }
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        let bytes = pcm16_to_bytes(&[0x0102, -2]);
        assert_eq!(bytes, vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn downmix_stereo_to_mono() {
        let stereo = vec![1.0f32, -1.0, 0.5, 0.5];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.0).abs() < f32::EPSILON);
        assert!((mono[1] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn downmix_mono_is_identity() {
        let mono = vec![0.1f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&mono, 1), mono);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resample(&input, 48000, 48000), input);
    }

    #[test]
    fn resample_halves_length_when_doubling_ratio() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32) / 480.0).collect();
        let output = resample(&input, 48000, 24000);
        assert!(
            (output.len() as i32 - 240).abs() <= 1,
            "expected ~240 samples, got {}",
            output.len()
        );
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(compute_rms(&vec![0i16; 1000]), 0.0);
        assert_eq!(compute_rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_square_wave_equals_amplitude() {
        let amplitude: i16 = 16384;
        let signal: Vec<i16> = (0..1000)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        let rms = compute_rms(&signal);
        let expected = amplitude as f32 / i16::MAX as f32;
        assert!((rms - expected).abs() < 0.001, "expected ≈{expected}, got {rms}");
    }

    fn solid_image(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::new(w, h);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgba([120, 40, 200, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn jpeg_frame_keeps_small_images_unscaled() {
        let (bytes, w, h) = encode_jpeg_frame(&solid_image(320, 200), 1024, 70).unwrap();
        assert_eq!((w, h), (320, 200));
        // JPEG magic
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn jpeg_frame_downscales_wide_images() {
        let (_, w, h) = encode_jpeg_frame(&solid_image(2048, 1024), 1024, 70).unwrap();
        assert_eq!(w, 1024);
        assert_eq!(h, 512);
    }
}
