//! Native callback capture backend via cpal.
//!
//! The audio callback delivers sample blocks near real time into the
//! backend queue. A `cpal::Stream` is not `Send`, so the stream is built
//! and owned by a dedicated thread; `open` still fails fast because the
//! build result is reported back before it returns.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::capture::{
    CaptureStream, DeviceDescriptor, PcmChunk, ReadOutcome, StreamFormat,
};
use crate::error::{RecorderError, Result};

enum StreamEvent {
    Samples(Vec<f32>),
    Error(String),
}

pub struct CpalCapture {
    label: String,
    format: StreamFormat,
    events: mpsc::Receiver<StreamEvent>,
    shutdown: Option<mpsc::Sender<()>>,
    owner: Option<JoinHandle<()>>,
    finished: bool,
    closing: bool,
}

impl CpalCapture {
    /// Open a capture stream on the named device (`None`, empty, or
    /// "default" selects the host default input).
    pub fn open(
        label: &str,
        device: Option<&str>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        let (events_tx, events) = mpsc::channel();
        let (startup_tx, startup_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        let selector = device.map(str::to_string);
        let owner_label = label.to_string();
        let owner = std::thread::spawn(move || {
            stream_owner(
                owner_label,
                selector,
                sample_rate,
                channels,
                events_tx,
                startup_tx,
                shutdown_rx,
            );
        });

        let format = match startup_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = owner.join();
                return Err(e);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(RecorderError::BackendUnavailable(
                    "capture thread exited before the stream was built".to_string(),
                ));
            }
        };

        info!(
            "Capture for {} configured with {} channel(s) at {} Hz",
            label, format.channels, format.sample_rate
        );

        Ok(Self {
            label: label.to_string(),
            format,
            events,
            shutdown: Some(shutdown_tx),
            owner: Some(owner),
            finished: false,
            closing: false,
        })
    }
}

impl CaptureStream for CpalCapture {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        if self.finished {
            return Ok(ReadOutcome::EndOfStream);
        }
        match self.events.recv_timeout(timeout) {
            Ok(StreamEvent::Samples(samples)) => Ok(ReadOutcome::Samples(PcmChunk {
                samples,
                channels: self.format.channels,
            })),
            Ok(StreamEvent::Error(message)) => {
                self.finished = true;
                warn!("Capture stream error on {}: {}", self.label, message);
                Err(RecorderError::DeviceDisconnected(message))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.finished = true;
                if self.closing {
                    Ok(ReadOutcome::EndOfStream)
                } else {
                    Err(RecorderError::DeviceDisconnected(format!(
                        "capture stream for {} ended unexpectedly",
                        self.label
                    )))
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(ReadOutcome::TimedOut),
        }
    }

    fn close(&mut self) {
        self.closing = true;
        if let Some(shutdown) = self.shutdown.take() {
            debug!("Closing capture stream for {}", self.label);
            let _ = shutdown.send(());
        }
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn stream_owner(
    label: String,
    selector: Option<String>,
    sample_rate: u32,
    channels: u16,
    events: mpsc::Sender<StreamEvent>,
    startup: mpsc::Sender<Result<StreamFormat>>,
    shutdown: mpsc::Receiver<()>,
) {
    let built = build_stream(&label, selector.as_deref(), sample_rate, channels, events);
    match built {
        Ok((stream, format)) => {
            if startup.send(Ok(format)).is_err() {
                return;
            }
            // Park until close; dropping the stream stops the callbacks.
            let _ = shutdown.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = startup.send(Err(e));
        }
    }
}

fn build_stream(
    label: &str,
    selector: Option<&str>,
    sample_rate: u32,
    channels: u16,
    events: mpsc::Sender<StreamEvent>,
) -> Result<(cpal::Stream, StreamFormat)> {
    let host = cpal::default_host();
    let device = select_device(&host, selector)?;

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    info!("Capture for {} using device: {}", label, device_name);

    let mut last_error: Option<String> = None;
    for (rate, ch) in format_candidates(&device, sample_rate, channels) {
        let config = cpal::StreamConfig {
            channels: ch,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let data_tx = events.clone();
        let error_tx = events.clone();
        let err_label = label.to_string();
        let result = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = data_tx.send(StreamEvent::Samples(data.to_vec()));
            },
            move |err| {
                warn!("Capture stream error on {}: {}", err_label, err);
                let _ = error_tx.send(StreamEvent::Error(err.to_string()));
            },
            None,
        );

        let stream = match result {
            Ok(stream) => stream,
            Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                return Err(RecorderError::DeviceBusy(format!(
                    "device '{device_name}' is not available (held by another process?)"
                )))
            }
            Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
                debug!(
                    "Device {} rejected {} Hz / {} channel(s)",
                    device_name, rate, ch
                );
                last_error = Some(format!("{rate} Hz / {ch} ch not supported"));
                continue;
            }
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };

        match stream.play() {
            Ok(()) => {
                if rate != sample_rate {
                    warn!(
                        "Adjusted sample rate for {} on {} from {} Hz to {} Hz",
                        label, device_name, sample_rate, rate
                    );
                }
                return Ok((
                    stream,
                    StreamFormat {
                        sample_rate: rate,
                        channels: ch,
                    },
                ));
            }
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        }
    }

    Err(RecorderError::BackendUnavailable(format!(
        "failed to open audio stream for {label} on {device_name}: no compatible \
         channel/sample rate combination{}",
        last_error.map(|e| format!(" ({e})")).unwrap_or_default()
    )))
}

/// Ordered format candidates: requested, device default, mono fallbacks.
fn format_candidates(device: &cpal::Device, sample_rate: u32, channels: u16) -> Vec<(u32, u16)> {
    let mut candidates = vec![(sample_rate, channels)];
    if let Ok(default) = device.default_input_config() {
        let rate = default.sample_rate().0;
        let ch = default.channels();
        for candidate in [(rate, ch), (rate, 1), (sample_rate, 1)] {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    } else if channels != 1 && !candidates.contains(&(sample_rate, 1)) {
        candidates.push((sample_rate, 1));
    }
    candidates
}

fn select_device(host: &cpal::Host, selector: Option<&str>) -> Result<cpal::Device> {
    let selector = selector.map(str::trim).filter(|s| !s.is_empty());

    let Some(wanted) = selector.filter(|s| !s.eq_ignore_ascii_case("default")) else {
        return host.default_input_device().ok_or_else(|| {
            RecorderError::BackendUnavailable("no default input device available".to_string())
        });
    };

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| RecorderError::BackendUnavailable(format!("cannot enumerate devices: {e}")))?
        .collect();

    if let Ok(index) = wanted.parse::<usize>() {
        return devices.into_iter().nth(index).ok_or_else(|| {
            RecorderError::InvalidDeviceSpec(format!("no input device with index {index}"))
        });
    }

    let mut fallback = None;
    for device in devices {
        let Ok(name) = device.name() else { continue };
        if name == wanted {
            return Ok(device);
        }
        if fallback.is_none() && name.to_lowercase().contains(&wanted.to_lowercase()) {
            fallback = Some(device);
        }
    }

    fallback.ok_or_else(|| {
        RecorderError::InvalidDeviceSpec(format!("no input device matching '{wanted}'"))
    })
}

/// Enumerate input devices, marking monitor/loopback sources so callers
/// can pick one for the `system` role.
pub fn list_devices() -> Result<Vec<DeviceDescriptor>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RecorderError::BackendUnavailable(format!("cannot enumerate devices: {e}")))?;

    let mut results = Vec::new();
    for (index, device) in devices.enumerate() {
        let Ok(name) = device.name() else { continue };
        let lowered = name.to_lowercase();
        let (rate, channels) = device
            .default_input_config()
            .map(|c| (c.sample_rate().0, c.channels()))
            .unwrap_or((0, 0));
        results.push(DeviceDescriptor {
            id: index.to_string(),
            label: name,
            is_loopback: lowered.contains("monitor") || lowered.contains("loopback"),
            default_sample_rate: rate,
            max_channels: channels,
        });
    }
    Ok(results)
}
