//! Subprocess capture backend powered by the FFmpeg command line tool.
//!
//! FFmpeg decodes the selected OS audio source to raw PCM on stdout. A
//! reader thread slices the pipe into chunk-sized sample blocks; a second
//! thread forwards encoder diagnostics to the log. Pipes buffer, so this
//! backend trades latency for reach — it can capture anything FFmpeg can.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::capture::{CaptureStream, PcmChunk, ReadOutcome, StreamFormat};
use crate::audio::device_spec::{DeviceSpec, SampleFormat};
use crate::error::{RecorderError, Result};

enum ReaderEvent {
    Samples(Vec<f32>),
    /// stdout reached EOF; the exit status decides clean vs. abnormal.
    Ended,
}

pub struct FfmpegCapture {
    label: String,
    format: StreamFormat,
    events: mpsc::Receiver<ReaderEvent>,
    process: Option<Child>,
    reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    /// Set once the stream has reported a terminal outcome.
    finished: bool,
    /// Set by `close` so a deliberate kill is not reported as a loss.
    closing: bool,
}

impl FfmpegCapture {
    /// Spawn FFmpeg for the parsed device spec. Fails fast with
    /// `BackendUnavailable` when the binary cannot be found or launched.
    pub fn open(label: &str, spec: &DeviceSpec, binary: &str, chunk_frames: usize) -> Result<Self> {
        let executable = resolve_binary(binary).ok_or_else(|| {
            RecorderError::BackendUnavailable(format!(
                "FFmpeg binary '{binary}' was not found; install FFmpeg and ensure it is on \
                 PATH, or set CONFAB_FFMPEG_BINARY to the executable"
            ))
        })?;

        let chunk_frames = chunk_frames.max(1);
        let format = StreamFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        };

        let mut command = Command::new(&executable);
        command.args(["-hide_banner", "-loglevel", "warning", "-nostats"]);
        command.args(&spec.args_before_input);
        command.arg("-f").arg(&spec.input_format);
        command.arg("-i").arg(&spec.input_target);
        command.args(&spec.args_after_input);
        command.args(["-vn", "-sn", "-dn"]);
        command.arg("-ac").arg(spec.channels.to_string());
        command.arg("-ar").arg(spec.sample_rate.to_string());
        command.args(["-acodec", spec.sample_format.codec()]);
        command.args(["-f", spec.sample_format.as_str(), "pipe:1"]);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        info!("Starting FFmpeg capture for {} using {:?}", label, executable);

        let mut process = command.spawn().map_err(|e| {
            RecorderError::BackendUnavailable(format!(
                "failed to launch FFmpeg binary {executable:?}: {e}"
            ))
        })?;

        let stdout = process.stdout.take().expect("stdout was piped");
        let stderr = process.stderr.take().expect("stderr was piped");

        let (events_tx, events) = mpsc::channel();
        let sample_format = spec.sample_format;
        let channels = spec.channels;
        let reader = std::thread::spawn(move || {
            reader_loop(stdout, events_tx, sample_format, channels, chunk_frames);
        });

        let stderr_label = label.to_string();
        let stderr_reader = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                let text = line.trim();
                if !text.is_empty() {
                    debug!("ffmpeg[{}]: {}", stderr_label, text);
                }
            }
        });

        Ok(Self {
            label: label.to_string(),
            format,
            events,
            process: Some(process),
            reader: Some(reader),
            stderr_reader: Some(stderr_reader),
            finished: false,
            closing: false,
        })
    }

    fn terminal_outcome(&mut self) -> Result<ReadOutcome> {
        self.finished = true;
        if self.closing {
            return Ok(ReadOutcome::EndOfStream);
        }
        let status = self.process.as_mut().and_then(|p| p.wait().ok());
        match status {
            Some(status) if status.success() => Ok(ReadOutcome::EndOfStream),
            Some(status) => {
                warn!(
                    "FFmpeg exited with {} while capturing {}",
                    status, self.label
                );
                Err(RecorderError::DeviceDisconnected(format!(
                    "ffmpeg exited with {status} while capturing {}",
                    self.label
                )))
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }
}

impl CaptureStream for FfmpegCapture {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        if self.finished {
            return Ok(ReadOutcome::EndOfStream);
        }
        match self.events.recv_timeout(timeout) {
            Ok(ReaderEvent::Samples(samples)) => Ok(ReadOutcome::Samples(PcmChunk {
                samples,
                channels: self.format.channels,
            })),
            Ok(ReaderEvent::Ended) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.terminal_outcome()
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(ReadOutcome::TimedOut),
        }
    }

    fn close(&mut self) {
        self.closing = true;
        if let Some(mut process) = self.process.take() {
            info!("Stopping FFmpeg capture for {}", self.label);
            let _ = process.kill();
            let _ = process.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(stderr_reader) = self.stderr_reader.take() {
            let _ = stderr_reader.join();
        }
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(
    mut stdout: impl Read,
    events: mpsc::Sender<ReaderEvent>,
    sample_format: SampleFormat,
    channels: u16,
    chunk_frames: usize,
) {
    let frame_size = channels as usize * sample_format.bytes_per_sample();
    let chunk_bytes = chunk_frames * frame_size;
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);
    let mut scratch = vec![0u8; chunk_bytes];

    loop {
        match stdout.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buffer.extend_from_slice(&scratch[..n]);
                while buffer.len() >= chunk_bytes {
                    let raw: Vec<u8> = buffer.drain(..chunk_bytes).collect();
                    if events
                        .send(ReaderEvent::Samples(decode_samples(&raw, sample_format)))
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    // Flush the remainder, aligned down to whole frames.
    let tail = (buffer.len() / frame_size) * frame_size;
    if tail > 0 {
        let _ = events.send(ReaderEvent::Samples(decode_samples(
            &buffer[..tail],
            sample_format,
        )));
    }
    let _ = events.send(ReaderEvent::Ended);
}

fn decode_samples(raw: &[u8], format: SampleFormat) -> Vec<f32> {
    match format {
        SampleFormat::F32le => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        SampleFormat::S16le => raw
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / format.scale())
            .collect(),
        SampleFormat::S32le => raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / format.scale())
            .collect(),
    }
}

/// Resolve the FFmpeg binary: PATH lookup first, then a literal path.
pub fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let binary = if binary.trim().is_empty() { "ffmpeg" } else { binary };

    if let Ok(found) = which::which(binary) {
        return Some(found);
    }

    let candidate = PathBuf::from(binary);
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_s16le_samples() {
        let raw = [0u8, 0, 0, 0x40, 0, 0xC0]; // 0, 16384, -16384
        let samples = decode_samples(&raw, SampleFormat::S16le);
        assert_eq!(samples.len(), 3);
        assert!((samples[0]).abs() < f32::EPSILON);
        assert!((samples[1] - 0.5).abs() < 1e-4);
        assert!((samples[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn decodes_f32le_samples() {
        let mut raw = Vec::new();
        for value in [0.25f32, -1.0, 0.5] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let samples = decode_samples(&raw, SampleFormat::F32le);
        assert_eq!(samples, vec![0.25, -1.0, 0.5]);
    }

    #[test]
    fn missing_binary_is_backend_unavailable() {
        let spec = crate::audio::device_spec::parse_device_spec("pulse:default", 16_000, 1).unwrap();
        let err = FfmpegCapture::open("mic", &spec, "/nonexistent/ffmpeg-binary", 1600)
            .err()
            .unwrap();
        assert!(matches!(err, RecorderError::BackendUnavailable(_)));
    }
}
