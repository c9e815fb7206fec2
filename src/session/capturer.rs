//! Per-channel capture loop and state machine.
//!
//! One capturer owns one backend stream bound to one logical role. Its
//! loop pulls frames from the backend, stamps them against the session
//! clock, and forwards them downstream over bounded queues. Control
//! signals (pause/resume/stop) are observed only at loop boundaries: a
//! frame in flight is always finished before a signal takes effect, so
//! every frame is either fully written or never started.

use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::capture::{CaptureStream, ReadOutcome, StreamFormat};
use crate::audio::clock::{PauseLedger, SessionClock};
use crate::audio::factory::{open_capture, CaptureDefaults};
use crate::error::{RecorderError, Result};
use crate::session::chunk_writer::WriterMsg;
use crate::session::frame::Frame;
use crate::session::state::{CapturerState, ChannelConfig, ChannelRole};
use crate::session::synchronizer::SyncMsg;

/// How long one backend read may block before control signals are
/// re-checked.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Shorter poll used while paused, where reads only drain the backend.
const PAUSED_READ_TIMEOUT: Duration = Duration::from_millis(50);
/// How long a pause/resume ack may take before the channel is treated
/// as failed.
const CONTROL_ACK_TIMEOUT: Duration = Duration::from_secs(5);

enum ControlMsg {
    Pause(mpsc::Sender<()>),
    Resume(mpsc::Sender<()>),
    Stop,
}

/// Observable health of one channel, shared with the orchestrator.
#[derive(Debug, Clone)]
pub struct ChannelHealth {
    pub state: CapturerState,
    pub error: Option<String>,
}

/// What the capture loop reports when it exits.
#[derive(Debug)]
pub struct CaptureReport {
    pub role: ChannelRole,
    /// Sample frames read from the backend and forwarded downstream.
    pub frames_forwarded: u64,
    pub failure: Option<RecorderError>,
}

/// A channel capturer whose backend is open but whose loop has not
/// started. Produced by [`ChannelCapturer::open`] so the orchestrator
/// can make session start all-or-nothing: every channel opens before any
/// channel captures.
pub struct PreparedCapturer {
    role: ChannelRole,
    stream: Box<dyn CaptureStream>,
    format: StreamFormat,
    health: Arc<Mutex<ChannelHealth>>,
}

impl PreparedCapturer {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Release the backend without capturing (sibling channel failed).
    pub fn abort(mut self) {
        self.stream.close();
        set_health(&self.health, CapturerState::Closed, None);
    }

    /// Transition to `Capturing` and spawn the capture loop.
    pub fn begin(
        self,
        clock: SessionClock,
        writer: SyncSender<WriterMsg>,
        synchronizer: Option<SyncSender<SyncMsg>>,
    ) -> ChannelCapturer {
        let (control_tx, control_rx) = mpsc::channel();
        set_health(&self.health, CapturerState::Capturing, None);

        let health = Arc::clone(&self.health);
        let role = self.role;
        let stream = self.stream;
        let thread = std::thread::spawn(move || {
            capture_loop(role, stream, clock, control_rx, writer, synchronizer, health)
        });

        ChannelCapturer {
            role,
            format: self.format,
            health: self.health,
            control: control_tx,
            thread: Some(thread),
            report: None,
        }
    }
}

pub struct ChannelCapturer {
    role: ChannelRole,
    format: StreamFormat,
    health: Arc<Mutex<ChannelHealth>>,
    control: mpsc::Sender<ControlMsg>,
    thread: Option<JoinHandle<CaptureReport>>,
    report: Option<CaptureReport>,
}

impl ChannelCapturer {
    /// Open the backend for one channel configuration. Fails fast with
    /// `InvalidDeviceSpec`/`DeviceBusy`/`BackendUnavailable` before any
    /// recording begins.
    pub fn open(config: &ChannelConfig, defaults: &CaptureDefaults) -> Result<PreparedCapturer> {
        let health = Arc::new(Mutex::new(ChannelHealth {
            state: CapturerState::Opening,
            error: None,
        }));

        let stream = open_capture(
            config.role.as_str(),
            config.backend,
            config.device.as_deref(),
            defaults,
        )?;
        let format = stream.format();

        Ok(PreparedCapturer {
            role: config.role,
            stream,
            format,
            health,
        })
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Shared health handle for concurrent `status` reads.
    pub fn health_handle(&self) -> Arc<Mutex<ChannelHealth>> {
        Arc::clone(&self.health)
    }

    pub fn health(&self) -> ChannelHealth {
        self.health.lock().expect("health lock poisoned").clone()
    }

    /// Pause capture. Returns once the loop has confirmed, which also
    /// means the seal for the open chunk is already queued behind every
    /// forwarded frame.
    pub fn pause(&self) -> Result<()> {
        self.signal(ControlMsg::Pause, "pause")
    }

    pub fn resume(&self) -> Result<()> {
        self.signal(ControlMsg::Resume, "resume")
    }

    fn signal(
        &self,
        make: impl FnOnce(mpsc::Sender<()>) -> ControlMsg,
        what: &str,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.control.send(make(ack_tx)).map_err(|_| {
            RecorderError::DeviceDisconnected(format!(
                "{} channel is no longer running",
                self.role
            ))
        })?;
        ack_rx.recv_timeout(CONTROL_ACK_TIMEOUT).map_err(|_| {
            RecorderError::DeviceDisconnected(format!(
                "{} channel did not confirm {what}",
                self.role
            ))
        })
    }

    /// Stop capture and wait for the loop to flush and exit. Guarantees
    /// no further frames are emitted after this returns. Idempotent.
    pub fn stop(&mut self) -> &CaptureReport {
        if self.report.is_none() {
            let _ = self.control.send(ControlMsg::Stop);
            let report = match self.thread.take() {
                Some(thread) => thread.join().unwrap_or_else(|_| {
                    set_health(
                        &self.health,
                        CapturerState::Failed,
                        Some("capture thread panicked".to_string()),
                    );
                    CaptureReport {
                        role: self.role,
                        frames_forwarded: 0,
                        failure: Some(RecorderError::DeviceDisconnected(
                            "capture thread panicked".to_string(),
                        )),
                    }
                }),
                None => CaptureReport {
                    role: self.role,
                    frames_forwarded: 0,
                    failure: None,
                },
            };
            self.report = Some(report);
        }
        self.report.as_ref().expect("report was just stored")
    }
}

fn set_health(health: &Arc<Mutex<ChannelHealth>>, state: CapturerState, error: Option<String>) {
    let mut guard = health.lock().expect("health lock poisoned");
    guard.state = state;
    if error.is_some() {
        guard.error = error;
    }
}

#[allow(clippy::too_many_arguments)]
fn capture_loop(
    role: ChannelRole,
    mut stream: Box<dyn CaptureStream>,
    clock: SessionClock,
    control: Receiver<ControlMsg>,
    writer: SyncSender<WriterMsg>,
    synchronizer: Option<SyncSender<SyncMsg>>,
    health: Arc<Mutex<ChannelHealth>>,
) -> CaptureReport {
    let mut ledger = PauseLedger::default();
    let mut seq: u64 = 0;
    let mut frames_forwarded: u64 = 0;
    let mut failure: Option<RecorderError> = None;

    info!("Capture loop for {} started", role);

    'capture: loop {
        // Control is handled between frames only.
        loop {
            match control.try_recv() {
                Ok(ControlMsg::Pause(ack)) => {
                    if !ledger.is_paused() {
                        ledger.pause();
                        // Seal queues behind all already-forwarded frames.
                        let _ = writer.send(WriterMsg::Seal);
                        set_health(&health, CapturerState::Paused, None);
                        debug!("Capture for {} paused", role);
                    }
                    let _ = ack.send(());
                }
                Ok(ControlMsg::Resume(ack)) => {
                    if ledger.is_paused() {
                        ledger.resume();
                        set_health(&health, CapturerState::Capturing, None);
                        debug!("Capture for {} resumed", role);
                    }
                    let _ = ack.send(());
                }
                Ok(ControlMsg::Stop) => break 'capture,
                Err(TryRecvError::Empty) => break,
                // Orchestrator gone: treat as stop.
                Err(TryRecvError::Disconnected) => break 'capture,
            }
        }

        if ledger.is_paused() {
            // Keep draining the backend so its buffers don't grow while
            // paused; the audio itself is discarded.
            match stream.read(PAUSED_READ_TIMEOUT) {
                Ok(ReadOutcome::Samples(_)) | Ok(ReadOutcome::TimedOut) => {}
                Ok(ReadOutcome::EndOfStream) => break 'capture,
                Err(e) => {
                    failure = Some(e);
                    break 'capture;
                }
            }
            continue;
        }

        match stream.read(READ_TIMEOUT) {
            Ok(ReadOutcome::Samples(chunk)) => {
                let frame = Frame::new(role, seq, ledger.stamp(&clock), chunk);
                seq += 1;
                frames_forwarded += frame.frame_count() as u64;

                // A full queue blocks here (backpressure); the backend
                // keeps buffering device audio on its own thread, so
                // nothing is lost and nothing is dropped.
                if writer.send(WriterMsg::Frame(frame.clone())).is_err() {
                    failure = Some(RecorderError::storage(format!(
                        "writer for {role} terminated"
                    )));
                    break 'capture;
                }
                if let Some(sync) = &synchronizer {
                    // A vanished synchronizer only loses the combined
                    // track, never the channel.
                    let _ = sync.send(SyncMsg::Frame(frame));
                }
            }
            Ok(ReadOutcome::TimedOut) => {}
            Ok(ReadOutcome::EndOfStream) => {
                debug!("Capture for {} reached end of stream", role);
                break 'capture;
            }
            Err(e) => {
                warn!("Capture for {} failed: {}", role, e);
                failure = Some(e);
                break 'capture;
            }
        }
    }

    set_health(&health, CapturerState::Closing, None);

    // Flush whatever the backend buffered before the stop landed.
    if failure.is_none() {
        loop {
            match stream.read(Duration::ZERO) {
                Ok(ReadOutcome::Samples(chunk)) => {
                    let frame = Frame::new(role, seq, ledger.stamp(&clock), chunk);
                    seq += 1;
                    frames_forwarded += frame.frame_count() as u64;
                    if writer.send(WriterMsg::Frame(frame.clone())).is_err() {
                        break;
                    }
                    if let Some(sync) = &synchronizer {
                        let _ = sync.send(SyncMsg::Frame(frame));
                    }
                }
                _ => break,
            }
        }
    }

    stream.close();
    let _ = writer.send(WriterMsg::Finish);
    if let Some(sync) = &synchronizer {
        let _ = sync.send(SyncMsg::Ended {
            role,
            failed: failure.is_some(),
        });
    }

    match &failure {
        Some(e) => set_health(&health, CapturerState::Failed, Some(e.to_string())),
        None => set_health(&health, CapturerState::Closed, None),
    }

    info!(
        "Capture loop for {} exited ({} frames forwarded)",
        role, frames_forwarded
    );

    CaptureReport {
        role,
        frames_forwarded,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synthetic::{SyntheticCapture, SyntheticConfig, Waveform};
    use std::sync::mpsc::sync_channel;

    fn prepared(config: SyntheticConfig) -> PreparedCapturer {
        let stream = SyntheticCapture::new(config);
        let format = stream.format();
        PreparedCapturer {
            role: ChannelRole::Mic,
            stream: Box::new(stream),
            format,
            health: Arc::new(Mutex::new(ChannelHealth {
                state: CapturerState::Opening,
                error: None,
            })),
        }
    }

    fn drain_writer(rx: Receiver<WriterMsg>) -> (u64, u32) {
        let mut frames = 0u64;
        let mut seals = 0u32;
        while let Ok(msg) = rx.recv() {
            match msg {
                WriterMsg::Frame(f) => frames += f.frame_count() as u64,
                WriterMsg::Seal => seals += 1,
                WriterMsg::Finish => break,
            }
        }
        (frames, seals)
    }

    #[test]
    fn forwards_all_frames_until_end_of_stream() {
        let mut config = SyntheticConfig::new(1_000, 1);
        config.total_frames = Some(3_500);
        config.chunk_frames = 500;
        config.paced = false;

        let (writer_tx, writer_rx) = sync_channel(64);
        let mut capturer = prepared(config).begin(SessionClock::start(), writer_tx, None);

        let (frames, _) = drain_writer(writer_rx);
        let report = capturer.stop();
        assert!(report.failure.is_none());
        assert_eq!(report.frames_forwarded, 3_500);
        assert_eq!(frames, 3_500);
        assert_eq!(capturer.health().state, CapturerState::Closed);
    }

    #[test]
    fn backpressure_blocks_without_dropping() {
        let mut config = SyntheticConfig::new(1_000, 1);
        config.total_frames = Some(5_000);
        config.chunk_frames = 100;
        config.paced = false;

        // Tiny queue, slow consumer: the forwarding step must block, and
        // every frame must still arrive.
        let (writer_tx, writer_rx) = sync_channel(2);
        let mut capturer = prepared(config).begin(SessionClock::start(), writer_tx, None);

        let consumer = std::thread::spawn(move || {
            let mut frames = 0u64;
            while let Ok(msg) = writer_rx.recv() {
                std::thread::sleep(Duration::from_millis(1));
                match msg {
                    WriterMsg::Frame(f) => frames += f.frame_count() as u64,
                    WriterMsg::Finish => break,
                    WriterMsg::Seal => {}
                }
            }
            frames
        });

        let received = consumer.join().unwrap();
        let report = capturer.stop();
        assert_eq!(report.frames_forwarded, 5_000);
        assert_eq!(received, 5_000);
        assert!(report.failure.is_none());
    }

    #[test]
    fn pause_seals_and_discards_then_resume_continues() {
        let mut config = SyntheticConfig::new(1_000, 1);
        config.chunk_frames = 100;
        config.waveform = Waveform::Ramp;
        // Paced so the loop is still running when control arrives.
        config.paced = true;

        let (writer_tx, writer_rx) = sync_channel(64);
        let mut capturer = prepared(config).begin(SessionClock::start(), writer_tx, None);

        std::thread::sleep(Duration::from_millis(120));
        capturer.pause().unwrap();
        assert_eq!(capturer.health().state, CapturerState::Paused);
        std::thread::sleep(Duration::from_millis(100));
        capturer.resume().unwrap();
        assert_eq!(capturer.health().state, CapturerState::Capturing);
        std::thread::sleep(Duration::from_millis(120));

        let report_frames = capturer.stop().frames_forwarded;
        let (frames, seals) = drain_writer(writer_rx);
        assert_eq!(frames, report_frames);
        assert_eq!(seals, 1);
    }

    #[test]
    fn disconnect_fails_channel_but_finishes_writer() {
        let mut config = SyntheticConfig::new(1_000, 1);
        config.fail_after_frames = Some(1_000);
        config.chunk_frames = 250;
        config.paced = false;

        let (writer_tx, writer_rx) = sync_channel(64);
        let mut capturer = prepared(config).begin(SessionClock::start(), writer_tx, None);

        let (frames, _) = drain_writer(writer_rx);
        let report = capturer.stop();
        assert!(matches!(
            report.failure,
            Some(RecorderError::DeviceDisconnected(_))
        ));
        // Everything captured before the disconnect reached the writer.
        assert_eq!(frames, 1_000);
        assert_eq!(capturer.health().state, CapturerState::Failed);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut config = SyntheticConfig::new(1_000, 1);
        config.total_frames = Some(500);
        config.chunk_frames = 250;
        config.paced = false;

        let (writer_tx, writer_rx) = sync_channel(64);
        let mut capturer = prepared(config).begin(SessionClock::start(), writer_tx, None);
        drain_writer(writer_rx);

        let first = capturer.stop().frames_forwarded;
        let second = capturer.stop().frames_forwarded;
        assert_eq!(first, second);
    }
}
