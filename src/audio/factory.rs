//! Construction of capture streams from channel configuration.
//!
//! Everything here runs before any recording starts: specs are validated,
//! formats negotiated, and failures propagate synchronously so a bad
//! channel never produces a single chunk file.

use tracing::debug;

use crate::audio::capture::{BackendKind, CaptureStream};
use crate::audio::cpal_capture::CpalCapture;
use crate::audio::device_spec::parse_device_spec;
use crate::audio::ffmpeg::FfmpegCapture;
use crate::audio::synthetic::{parse_synthetic_spec, SyntheticCapture};
use crate::error::{RecorderError, Result};

/// Session-level defaults a backend falls back to when the device spec
/// leaves a field unset.
#[derive(Debug, Clone)]
pub struct CaptureDefaults {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_seconds: f64,
    pub ffmpeg_binary: String,
}

/// Open a capture stream for one channel.
pub fn open_capture(
    label: &str,
    backend: BackendKind,
    device: Option<&str>,
    defaults: &CaptureDefaults,
) -> Result<Box<dyn CaptureStream>> {
    debug!(
        "Opening {} capture for {} (device: {})",
        backend.as_str(),
        label,
        device.unwrap_or("default")
    );

    match backend {
        BackendKind::Ffmpeg => {
            let device = device.filter(|d| !d.trim().is_empty()).ok_or_else(|| {
                RecorderError::InvalidDeviceSpec(format!(
                    "ffmpeg backend requires a device specification for {label}"
                ))
            })?;
            let spec = parse_device_spec(device, defaults.sample_rate, defaults.channels)?;
            let chunk_frames = spec.chunk_frames.unwrap_or_else(|| {
                ((spec.sample_rate as f64 * defaults.chunk_seconds.max(0.001)) as usize).max(1)
            });
            let capture = FfmpegCapture::open(label, &spec, &defaults.ffmpeg_binary, chunk_frames)?;
            Ok(Box::new(capture))
        }
        BackendKind::Cpal => {
            let capture =
                CpalCapture::open(label, device, defaults.sample_rate, defaults.channels)?;
            Ok(Box::new(capture))
        }
        BackendKind::Synthetic => {
            let config = parse_synthetic_spec(
                device.unwrap_or("sine"),
                defaults.sample_rate,
                defaults.channels,
            )?;
            Ok(Box::new(SyntheticCapture::new(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CaptureDefaults {
        CaptureDefaults {
            sample_rate: 16_000,
            channels: 1,
            chunk_seconds: 1.0,
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }

    #[test]
    fn ffmpeg_without_device_is_invalid() {
        let err = open_capture("mic", BackendKind::Ffmpeg, None, &defaults())
            .err()
            .unwrap();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
    }

    #[test]
    fn malformed_ffmpeg_spec_fails_before_capture() {
        let err = open_capture(
            "system",
            BackendKind::Ffmpeg,
            Some("pulse:default?bogus=1"),
            &defaults(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
    }

    #[test]
    fn synthetic_spec_opens() {
        let capture = open_capture(
            "mic",
            BackendKind::Synthetic,
            Some("sine:440?seconds=1"),
            &defaults(),
        )
        .unwrap();
        assert_eq!(capture.format().sample_rate, 16_000);
    }

    #[test]
    fn malformed_synthetic_spec_is_invalid() {
        let err = open_capture("mic", BackendKind::Synthetic, Some("square:1"), &defaults())
            .err()
            .unwrap();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
    }
}
