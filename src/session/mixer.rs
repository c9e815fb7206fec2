//! Pure sample math for mixing and resampling.
//!
//! No state, no side effects — easy to test.

/// Collapse interleaved multi-channel samples to mono by averaging.
pub fn downmix_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample audio from one sample rate to another using linear
/// interpolation. Suitable for speech audio where perfect quality isn't
/// critical.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f64;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] as f64 * (1.0 - frac) + samples[src_idx + 1] as f64 * frac
        } else if src_idx < samples.len() {
            samples[src_idx] as f64
        } else {
            0.0
        };

        resampled.push(sample as f32);
    }

    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_mono_passthrough() {
        let samples = vec![0.5, -0.3, 0.1];
        assert_eq!(downmix_mono(&samples, 1), samples);
    }

    #[test]
    fn test_downmix_stereo_averages() {
        let samples = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_mono(&samples, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![1.0, 2.0, 3.0];
        let result = resample(&samples, 16000, 16000);
        assert_eq!(result, samples);
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz to 16kHz (3:1 ratio)
        let samples: Vec<f32> = (0..48).map(|i| i as f32).collect();
        let result = resample(&samples, 48000, 16000);
        assert_eq!(result.len(), 16);
    }

    #[test]
    fn test_resample_upsample_interpolates() {
        let samples = vec![0.0, 1.0];
        let result = resample(&samples, 8000, 16000);
        assert_eq!(result.len(), 4);
        assert!((result[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_empty() {
        let result = resample(&[], 48000, 16000);
        assert!(result.is_empty());
    }

}
