//! Deterministic generator backend.
//!
//! Produces synthetic PCM without touching any audio hardware. Used by the
//! test suite and by `confab record --backend synthetic` smoke runs. Spec
//! form: `<wave>:<arg>?seconds=&rate=&channels=&chunk_ms=&fail_after=&paced=`,
//! with waves `sine:<hz>`, `ramp:` and `silence:`.

use std::time::Duration;

use crate::audio::capture::{CaptureStream, PcmChunk, ReadOutcome, StreamFormat};
use crate::error::{RecorderError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sine { frequency: f32 },
    /// One linear sweep from -1.0 to 1.0 per second; handy for spotting
    /// discontinuities in recorded output.
    Ramp,
    Silence,
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub waveform: Waveform,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_frames: usize,
    /// Total frames to produce before a clean `EndOfStream`; `None` runs
    /// until closed.
    pub total_frames: Option<u64>,
    /// Report `DeviceDisconnected` after this many frames.
    pub fail_after_frames: Option<u64>,
    /// Sleep one chunk duration per read, approximating a live device.
    pub paced: bool,
}

impl SyntheticConfig {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            waveform: Waveform::Sine { frequency: 440.0 },
            sample_rate,
            channels,
            chunk_frames: (sample_rate / 10).max(1) as usize,
            total_frames: None,
            fail_after_frames: None,
            paced: true,
        }
    }
}

/// Parse a synthetic device spec against the session defaults.
pub fn parse_synthetic_spec(
    device: &str,
    default_sample_rate: u32,
    default_channels: u16,
) -> Result<SyntheticConfig> {
    let trimmed = device.trim();
    let (base, query) = match trimmed.split_once('?') {
        Some((base, query)) => (base, query),
        None => (trimmed, ""),
    };

    let (wave, arg) = match base.split_once(':') {
        Some((wave, arg)) => (wave, arg),
        None => (base, ""),
    };

    let waveform = match wave.to_lowercase().as_str() {
        "" | "sine" => {
            let frequency = if arg.is_empty() {
                440.0
            } else {
                arg.parse().map_err(|_| {
                    RecorderError::InvalidDeviceSpec(format!("invalid sine frequency: {arg}"))
                })?
            };
            Waveform::Sine { frequency }
        }
        "ramp" => Waveform::Ramp,
        "silence" => Waveform::Silence,
        other => {
            return Err(RecorderError::InvalidDeviceSpec(format!(
                "unknown synthetic waveform '{other}' (expected sine, ramp, or silence)"
            )))
        }
    };

    let mut config = SyntheticConfig::new(default_sample_rate, default_channels);
    config.waveform = waveform;

    // Durations are converted to frames only once every key is read, so
    // `seconds=2&rate=8000` and `rate=8000&seconds=2` mean the same.
    let mut seconds: Option<f64> = None;
    let mut chunk_ms: Option<f64> = None;
    let mut fail_after: Option<f64> = None;

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "seconds" => seconds = Some(parse_value(value, "seconds")?),
            "rate" => config.sample_rate = parse_value(value, "rate")?,
            "channels" => config.channels = parse_value(value, "channels")?,
            "chunk_ms" => chunk_ms = Some(parse_value(value, "chunk_ms")?),
            "paced" => config.paced = parse_value(value, "paced")?,
            "fail_after" => fail_after = Some(parse_value(value, "fail_after")?),
            other => {
                return Err(RecorderError::InvalidDeviceSpec(format!(
                    "unknown synthetic option: {other}"
                )))
            }
        }
    }

    if config.sample_rate == 0 || config.channels == 0 {
        return Err(RecorderError::InvalidDeviceSpec(
            "synthetic rate and channels must be positive".to_string(),
        ));
    }

    let rate = config.sample_rate as f64;
    config.chunk_frames = match chunk_ms {
        Some(ms) => ((rate * ms / 1000.0) as usize).max(1),
        None => (config.sample_rate / 10).max(1) as usize,
    };
    config.total_frames = seconds.map(|s| (s * rate) as u64);
    config.fail_after_frames = fail_after.map(|s| (s * rate) as u64);

    Ok(config)
}

fn parse_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RecorderError::InvalidDeviceSpec(format!("invalid {key}: {value}")))
}

pub struct SyntheticCapture {
    config: SyntheticConfig,
    frames_produced: u64,
    closed: bool,
    failed: bool,
}

impl SyntheticCapture {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frames_produced: 0,
            closed: false,
            failed: false,
        }
    }

    fn sample_at(&self, frame_index: u64) -> f32 {
        let rate = self.config.sample_rate as f32;
        match self.config.waveform {
            Waveform::Sine { frequency } => {
                let t = frame_index as f32 / rate;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5
            }
            Waveform::Ramp => {
                let pos = (frame_index % self.config.sample_rate as u64) as f32 / rate;
                pos * 2.0 - 1.0
            }
            Waveform::Silence => 0.0,
        }
    }
}

impl CaptureStream for SyntheticCapture {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        }
    }

    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        if self.closed || self.failed {
            return Ok(ReadOutcome::EndOfStream);
        }

        // A paced generator has no backlog: a non-blocking poll finds
        // nothing ready, like a live device queue would.
        if self.config.paced && timeout.is_zero() {
            return Ok(ReadOutcome::TimedOut);
        }

        if let Some(fail_after) = self.config.fail_after_frames {
            if self.frames_produced >= fail_after {
                self.failed = true;
                return Err(RecorderError::DeviceDisconnected(
                    "synthetic device disconnect".to_string(),
                ));
            }
        }

        let mut frames = self.config.chunk_frames as u64;
        if let Some(total) = self.config.total_frames {
            let remaining = total.saturating_sub(self.frames_produced);
            if remaining == 0 {
                return Ok(ReadOutcome::EndOfStream);
            }
            frames = frames.min(remaining);
        }
        if let Some(fail_after) = self.config.fail_after_frames {
            frames = frames.min(fail_after.saturating_sub(self.frames_produced).max(1));
        }

        if self.config.paced {
            let chunk_nanos =
                frames as u64 * 1_000_000_000 / self.config.sample_rate.max(1) as u64;
            std::thread::sleep(Duration::from_nanos(chunk_nanos));
        }

        let channels = self.config.channels as usize;
        let mut samples = Vec::with_capacity(frames as usize * channels);
        for i in 0..frames {
            let value = self.sample_at(self.frames_produced + i);
            for _ in 0..channels {
                samples.push(value);
            }
        }
        self.frames_produced += frames;

        Ok(ReadOutcome::Samples(PcmChunk {
            samples,
            channels: self.config.channels,
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
