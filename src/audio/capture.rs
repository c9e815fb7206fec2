//! Capture backend abstraction.
//!
//! Each backend variant (subprocess encoder, native callback, synthetic)
//! implements the same open/read/close contract independently. Backends
//! differ in latency and jitter — subprocess pipes buffer, callback APIs
//! deliver near real time — and callers must not assume either.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RecorderError, Result};

/// Backend variant, selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// FFmpeg subprocess decoding an OS audio source to raw PCM on a pipe.
    Ffmpeg,
    /// Native callback capture via cpal/PortAudio-style host APIs.
    Cpal,
    /// Deterministic generator for tests and smoke runs.
    Synthetic,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Cpal => "cpal",
            Self::Synthetic => "synthetic",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = RecorderError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "cpal" | "native" => Ok(Self::Cpal),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(RecorderError::InvalidDeviceSpec(format!(
                "unknown audio backend '{other}'"
            ))),
        }
    }
}

/// A capture device as reported by `list_devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
    /// Monitor/loopback devices carry the system playback stream and are
    /// the natural pick for the `system` role.
    pub is_loopback: bool,
    pub default_sample_rate: u32,
    pub max_channels: u16,
}

/// Negotiated stream format after `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One block of interleaved f32 samples pulled from a backend.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl PcmChunk {
    /// Number of sample frames (samples per channel) in the block.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Result of one `read` call.
#[derive(Debug)]
pub enum ReadOutcome {
    Samples(PcmChunk),
    /// No data became available within the timeout.
    TimedOut,
    /// The device closed cleanly; no further samples will arrive.
    EndOfStream,
}

/// An open capture stream.
///
/// `read` blocks up to `timeout` and fails with `DeviceDisconnected` on
/// abnormal device loss. `close` is idempotent and releases the
/// underlying resources (process, stream, buffers) on every exit path.
pub trait CaptureStream: Send {
    fn format(&self) -> StreamFormat;

    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome>;

    fn close(&mut self);
}
