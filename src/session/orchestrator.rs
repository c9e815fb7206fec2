//! Session lifecycle orchestration.
//!
//! Owns the two channel capturers, their writers, and the optional
//! synchronizer. Start is all-or-nothing: every backend opens before any
//! capture thread spawns, so a bad device spec never leaves a chunk file
//! behind. Control calls on one session are serialized; `status` is
//! always safe to call concurrently.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::audio::capture::StreamFormat;
use crate::audio::clock::SessionClock;
use crate::audio::factory::CaptureDefaults;
use crate::config::Settings;
use crate::error::{RecorderError, Result};
use crate::session::capturer::{ChannelCapturer, ChannelHealth, PreparedCapturer};
use crate::session::chunk_writer::{spawn_chunk_writer, WriterConfig, WriterReport};
use crate::session::state::{CapturerState, ChannelRole, SessionConfig, SessionPhase};
use crate::session::summary::{
    ChannelStatus, ChannelSummary, CombinedOutcome, SessionStatus, SessionSummary,
};
use crate::session::synchronizer::{
    spawn_synchronizer, SyncConfig, SyncOutcome, SyncReport,
};

/// Frames buffered per writer/synchronizer queue before the capturer's
/// forwarding step blocks.
const QUEUE_CAPACITY: usize = 64;
const SYNC_QUEUE_CAPACITY: usize = 128;
/// How much leading-channel audio the synchronizer buffers before it
/// mixes against silence.
const LEAD_WINDOW_SECONDS: f64 = 10.0;

pub struct SessionOrchestrator {
    ffmpeg_binary: String,
    session_prefix: String,
}

/// Cheap, cloneable reference to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.id
    }

    pub fn session_dir(&self) -> &PathBuf {
        &self.inner.session_dir
    }
}

struct SessionInner {
    id: String,
    name: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    sample_rate: u32,
    base_dir: PathBuf,
    session_dir: PathBuf,
    phase: Mutex<SessionPhase>,
    warnings: Mutex<Vec<String>>,
    channel_health: Vec<(ChannelRole, Arc<Mutex<ChannelHealth>>)>,
    control: Mutex<SessionControl>,
}

struct WriterSlot {
    role: ChannelRole,
    backend: crate::audio::capture::BackendKind,
    format: StreamFormat,
    directory: PathBuf,
    handle: Option<JoinHandle<WriterReport>>,
}

struct SessionControl {
    capturers: Vec<ChannelCapturer>,
    writers: Vec<WriterSlot>,
    synchronizer: Option<JoinHandle<SyncReport>>,
    summary: Option<SessionSummary>,
}

impl SessionOrchestrator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ffmpeg_binary: settings.ffmpeg_binary.clone(),
            session_prefix: settings.session_prefix.clone(),
        }
    }

    /// Start a recording session. Either every channel opens and the
    /// session is recording when this returns, or nothing was started
    /// and no file exists.
    pub fn start_session(&self, config: SessionConfig) -> Result<SessionHandle> {
        if config.inputs.is_empty() {
            return Err(RecorderError::InvalidDeviceSpec(
                "at least one capture channel must be configured".to_string(),
            ));
        }
        for (i, input) in config.inputs.iter().enumerate() {
            if config.inputs[..i].iter().any(|c| c.role == input.role) {
                return Err(RecorderError::InvalidDeviceSpec(format!(
                    "duplicate channel role: {}",
                    input.role
                )));
            }
        }

        let defaults = CaptureDefaults {
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_seconds: config.chunk_seconds,
            ffmpeg_binary: self.ffmpeg_binary.clone(),
        };

        // Open every backend before anything records.
        let mut prepared: Vec<(PreparedCapturer, crate::audio::capture::BackendKind)> = Vec::new();
        for input in &config.inputs {
            match ChannelCapturer::open(input, &defaults) {
                Ok(capturer) => prepared.push((capturer, input.backend)),
                Err(e) => {
                    warn!("Channel {} failed to open: {}; aborting start", input.role, e);
                    for (capturer, _) in prepared {
                        capturer.abort();
                    }
                    return Err(e);
                }
            }
        }

        let session_id = format!(
            "{}-{}",
            self.session_prefix,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let session_dir = config.base_dir.join(&session_id);

        let mix_requested = config.mix_down
            && prepared.len() == 2
            && prepared.iter().any(|(p, _)| p.role() == ChannelRole::Mic)
            && prepared.iter().any(|(p, _)| p.role() == ChannelRole::System);
        let mut warnings = Vec::new();
        if config.mix_down && !mix_requested {
            warnings.push(
                "combined track skipped: mixing needs both a mic and a system channel".to_string(),
            );
        }

        let synchronizer_input = if mix_requested {
            let processed = session_dir.join("processed");
            let (sync_tx, sync_rx) = sync_channel(SYNC_QUEUE_CAPACITY);
            let format_for = |role: ChannelRole| {
                prepared
                    .iter()
                    .find(|(p, _)| p.role() == role)
                    .map(|(p, _)| p.format())
                    .expect("both roles are present")
            };
            let sync_config = SyncConfig {
                sample_rate: config.sample_rate,
                staging: processed.join("combined.wav.partial"),
                target: processed.join("combined.wav"),
                mic_format: format_for(ChannelRole::Mic),
                system_format: format_for(ChannelRole::System),
                lead_window_seconds: LEAD_WINDOW_SECONDS,
            };
            Some((spawn_synchronizer(sync_config, sync_rx), sync_tx))
        } else {
            None
        };
        let (synchronizer, sync_tx) = match synchronizer_input {
            Some((handle, tx)) => (Some(handle), Some(tx)),
            None => (None, None),
        };

        let clock = SessionClock::start();
        let mut capturers = Vec::new();
        let mut writers = Vec::new();
        let mut channel_health = Vec::new();

        for (capturer, backend) in prepared {
            let role = capturer.role();
            let format = capturer.format();
            let directory = session_dir.join("raw").join(role.as_str());

            let (writer_tx, writer_rx) = sync_channel(QUEUE_CAPACITY);
            let writer_handle = spawn_chunk_writer(
                WriterConfig {
                    role,
                    directory: directory.clone(),
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    chunk_frames: config.chunk_frames(format.sample_rate),
                },
                writer_rx,
            );

            let capturer = capturer.begin(clock, writer_tx, sync_tx.clone());
            channel_health.push((role, capturer.health_handle()));
            capturers.push(capturer);
            writers.push(WriterSlot {
                role,
                backend,
                format,
                directory,
                handle: Some(writer_handle),
            });
        }
        // The capturers own the only remaining synchronizer senders.
        drop(sync_tx);

        info!("Recording session {} started at {:?}", session_id, session_dir);

        let inner = Arc::new(SessionInner {
            id: session_id,
            name: config.name.clone(),
            created_at: Utc::now(),
            sample_rate: config.sample_rate,
            base_dir: config.base_dir.clone(),
            session_dir,
            phase: Mutex::new(SessionPhase::Recording),
            warnings: Mutex::new(warnings),
            channel_health,
            control: Mutex::new(SessionControl {
                capturers,
                writers,
                synchronizer,
                summary: None,
            }),
        });

        Ok(SessionHandle { inner })
    }

    /// Pause both channels. The session is `Paused` once every live
    /// channel confirms; a channel that fails during the transition
    /// leaves the session recording in a degraded state instead.
    pub fn pause(&self, handle: &SessionHandle) -> Result<()> {
        let inner = &handle.inner;
        let control = inner.control.lock().expect("control lock poisoned");
        refresh_phase(inner);

        {
            let phase = inner.phase.lock().expect("phase lock poisoned");
            if *phase != SessionPhase::Recording {
                return Err(RecorderError::InvalidStateTransition(format!(
                    "cannot pause a session that is {}",
                    phase.as_str()
                )));
            }
        }

        let mut confirmed: Vec<&ChannelCapturer> = Vec::new();
        let mut failed_roles = Vec::new();
        for capturer in control
            .capturers
            .iter()
            .filter(|c| c.health().state == CapturerState::Capturing)
        {
            match capturer.pause() {
                Ok(()) => confirmed.push(capturer),
                Err(e) => {
                    warn!("Channel {} failed to pause: {}", capturer.role(), e);
                    failed_roles.push(capturer.role());
                }
            }
        }

        if failed_roles.is_empty() && !confirmed.is_empty() {
            *inner.phase.lock().expect("phase lock poisoned") = SessionPhase::Paused;
            info!("Session {} paused", inner.id);
            return Ok(());
        }

        if confirmed.is_empty() && failed_roles.is_empty() {
            return Err(RecorderError::InvalidStateTransition(
                "no channel is capturing".to_string(),
            ));
        }

        if confirmed.is_empty() {
            *inner.phase.lock().expect("phase lock poisoned") = SessionPhase::Failed;
            return Err(RecorderError::DeviceDisconnected(
                "no channel survived the pause transition".to_string(),
            ));
        }

        // Partial confirmation: abandon the pause, keep the survivors
        // recording, and report the degradation.
        for capturer in &confirmed {
            if let Err(e) = capturer.resume() {
                warn!("Channel {} failed to resume after aborted pause: {}", capturer.role(), e);
            }
        }
        let mut warnings = inner.warnings.lock().expect("warnings lock poisoned");
        for role in &failed_roles {
            warnings.push(format!("channel {role} failed during pause; continuing degraded"));
        }
        info!("Session {} degraded during pause; still recording", inner.id);
        Ok(())
    }

    /// Resume both channels. Mirrors `pause`.
    pub fn resume(&self, handle: &SessionHandle) -> Result<()> {
        let inner = &handle.inner;
        let control = inner.control.lock().expect("control lock poisoned");
        refresh_phase(inner);

        {
            let phase = inner.phase.lock().expect("phase lock poisoned");
            if *phase != SessionPhase::Paused {
                return Err(RecorderError::InvalidStateTransition(format!(
                    "cannot resume a session that is {}",
                    phase.as_str()
                )));
            }
        }

        let mut any_resumed = false;
        let mut failed_roles = Vec::new();
        for capturer in control
            .capturers
            .iter()
            .filter(|c| c.health().state == CapturerState::Paused)
        {
            match capturer.resume() {
                Ok(()) => any_resumed = true,
                Err(e) => {
                    warn!("Channel {} failed to resume: {}", capturer.role(), e);
                    failed_roles.push(capturer.role());
                }
            }
        }

        if !any_resumed {
            *inner.phase.lock().expect("phase lock poisoned") = SessionPhase::Failed;
            return Err(RecorderError::DeviceDisconnected(
                "no channel survived the resume transition".to_string(),
            ));
        }

        *inner.phase.lock().expect("phase lock poisoned") = SessionPhase::Recording;
        if !failed_roles.is_empty() {
            let mut warnings = inner.warnings.lock().expect("warnings lock poisoned");
            for role in &failed_roles {
                warnings.push(format!("channel {role} failed during resume; continuing degraded"));
            }
            info!("Session {} resumed degraded", inner.id);
        } else {
            info!("Session {} resumed", inner.id);
        }
        Ok(())
    }

    /// Stop the session, seal every channel's final chunk, finalize the
    /// combined track, and return the summary. Idempotent: a second
    /// `stop` returns the identical summary without side effects.
    pub fn stop(&self, handle: &SessionHandle) -> Result<SessionSummary> {
        let inner = &handle.inner;
        let mut control = inner.control.lock().expect("control lock poisoned");

        if let Some(summary) = &control.summary {
            return Ok(summary.clone());
        }

        info!("Stopping session {}", inner.id);

        let mut capture_failures: Vec<(ChannelRole, String)> = Vec::new();
        for capturer in control.capturers.iter_mut() {
            let report = capturer.stop();
            if let Some(failure) = &report.failure {
                capture_failures.push((report.role, failure.to_string()));
            }
        }

        let mut channels = Vec::new();
        for slot in control.writers.iter_mut() {
            let report = match slot.handle.take() {
                Some(handle) => handle.join().unwrap_or(WriterReport {
                    role: slot.role,
                    chunks_sealed: 0,
                    frames_written: 0,
                    error: Some(RecorderError::storage("writer thread panicked")),
                }),
                None => continue,
            };

            let capture_error = capture_failures
                .iter()
                .find(|(role, _)| *role == slot.role)
                .map(|(_, e)| e.clone());
            let writer_error = report.error.as_ref().map(|e| e.to_string());
            let failed = capture_error.is_some() || writer_error.is_some();

            channels.push(ChannelSummary {
                role: slot.role,
                backend: slot.backend,
                format: slot.format,
                directory: slot.directory.clone(),
                chunks_sealed: report.chunks_sealed,
                frames_captured: report.frames_written,
                duration_seconds: report.duration_seconds(slot.format.sample_rate),
                failed,
                error: capture_error.or(writer_error),
            });
        }

        let mut warnings = inner.warnings.lock().expect("warnings lock poisoned").clone();

        let combined = match control.synchronizer.take() {
            None => CombinedOutcome::Skipped,
            Some(handle) => match handle.join() {
                Ok(report) => match report.outcome {
                    SyncOutcome::Complete(path) => CombinedOutcome::Complete(path),
                    SyncOutcome::Incomplete(path) => CombinedOutcome::Incomplete(path),
                    SyncOutcome::Failed(message) => {
                        warnings.push(format!("combined track failed: {message}"));
                        CombinedOutcome::Skipped
                    }
                },
                Err(_) => {
                    warnings.push("combined track failed: synchronizer panicked".to_string());
                    CombinedOutcome::Skipped
                }
            },
        };
        let any_failed = channels.iter().any(|c| c.failed);
        let all_failed = !channels.is_empty() && channels.iter().all(|c| c.failed);
        let phase = if all_failed {
            SessionPhase::Failed
        } else {
            SessionPhase::Stopped
        };
        *inner.phase.lock().expect("phase lock poisoned") = phase;

        let duration_seconds = channels
            .iter()
            .map(|c| c.duration_seconds)
            .fold(0.0, f64::max);

        let summary = SessionSummary {
            session_id: inner.id.clone(),
            name: inner.name.clone(),
            created_at: inner.created_at,
            phase,
            sample_rate: inner.sample_rate,
            duration_seconds,
            base_dir: inner.base_dir.clone(),
            channels,
            combined,
            degraded: any_failed && !all_failed,
            warnings,
        };

        info!(
            "Session {} stopped: {} ({}s)",
            inner.id,
            summary.phase.as_str(),
            summary.duration_seconds
        );

        control.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Read-only view of the session; never blocks on control calls.
    pub fn status(&self, handle: &SessionHandle) -> SessionStatus {
        let inner = &handle.inner;
        refresh_phase(inner);

        let channels: Vec<ChannelStatus> = inner
            .channel_health
            .iter()
            .map(|(role, health)| {
                let health = health.lock().expect("health lock poisoned").clone();
                ChannelStatus {
                    role: *role,
                    state: health.state,
                    error: health.error,
                }
            })
            .collect();

        let phase = *inner.phase.lock().expect("phase lock poisoned");
        let any_failed = channels.iter().any(|c| c.state == CapturerState::Failed);
        let all_failed =
            !channels.is_empty() && channels.iter().all(|c| c.state == CapturerState::Failed);

        SessionStatus {
            session_id: inner.id.clone(),
            phase,
            started_at: inner.created_at,
            channels,
            degraded: any_failed && !all_failed,
        }
    }
}

/// Fold channel failures into the session phase: once no live channel
/// remains, the session is `Failed` immediately rather than lingering as
/// a recording with zero channels.
fn refresh_phase(inner: &SessionInner) {
    let mut phase = inner.phase.lock().expect("phase lock poisoned");
    if phase.is_terminal() || inner.channel_health.is_empty() {
        return;
    }
    let all_failed = inner.channel_health.iter().all(|(_, health)| {
        health.lock().expect("health lock poisoned").state == CapturerState::Failed
    });
    if all_failed {
        *phase = SessionPhase::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::BackendKind;
    use crate::session::state::ChannelConfig;

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator {
            ffmpeg_binary: "ffmpeg".to_string(),
            session_prefix: "session".to_string(),
        }
    }

    fn synthetic_config(
        base_dir: PathBuf,
        mic_spec: &str,
        system_spec: &str,
        mix_down: bool,
    ) -> SessionConfig {
        SessionConfig {
            name: Some("test meeting".to_string()),
            sample_rate: 16_000,
            channels: 1,
            chunk_seconds: 1.0,
            base_dir,
            inputs: vec![
                ChannelConfig {
                    role: ChannelRole::Mic,
                    backend: BackendKind::Synthetic,
                    device: Some(mic_spec.to_string()),
                },
                ChannelConfig {
                    role: ChannelRole::System,
                    backend: BackendKind::Synthetic,
                    device: Some(system_spec.to_string()),
                },
            ],
            mix_down,
        }
    }

    fn decoded_frames(directory: &std::path::Path) -> (u32, u64) {
        let mut names: Vec<PathBuf> = std::fs::read_dir(directory)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        let mut total = 0u64;
        for (i, path) in names.iter().enumerate() {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert_eq!(name, format!("chunk-{i:05}.wav"), "chunk numbering gap");
            total += hound::WavReader::open(path).unwrap().len() as u64;
        }
        (names.len() as u32, total)
    }

    #[test]
    fn end_to_end_four_chunks_and_combined_track() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let spec = "ramp:?seconds=3.2&chunk_ms=100&paced=false";
        let handle = orch
            .start_session(synthetic_config(dir.path().to_path_buf(), spec, spec, true))
            .unwrap();

        let summary = orch.stop(&handle).unwrap();

        assert_eq!(summary.phase, SessionPhase::Stopped);
        assert!(summary.is_clean(), "warnings: {:?}", summary.warnings);
        assert_eq!(summary.channels.len(), 2);
        for channel in &summary.channels {
            // 3.2 s at 16 kHz with 1 s chunks: 3 full + 1 partial.
            assert_eq!(channel.chunks_sealed, 4, "{}", channel.role);
            assert_eq!(channel.frames_captured, 51_200);
            assert!((channel.duration_seconds - 3.2).abs() < 1e-6);
            let (count, frames) = decoded_frames(&channel.directory);
            assert_eq!(count, 4);
            assert_eq!(frames, 51_200);
        }
        assert!((summary.duration_seconds - 3.2).abs() < 1e-6);

        let CombinedOutcome::Complete(path) = &summary.combined else {
            panic!("expected complete combined track, got {:?}", summary.combined);
        };
        let reader = hound::WavReader::open(path).unwrap();
        let combined_seconds = reader.len() as f64 / 16_000.0;
        assert!(
            (3.2..3.3).contains(&combined_seconds),
            "combined covers {combined_seconds}s"
        );
    }

    #[test]
    fn invalid_system_spec_fails_start_with_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let config = synthetic_config(
            dir.path().to_path_buf(),
            "sine:440?seconds=1&paced=false",
            "square:1",
            true,
        );

        let err = orch.start_session(config).err().unwrap();
        assert!(matches!(err, RecorderError::InvalidDeviceSpec(_)));
        // All-or-nothing: nothing on disk for either channel.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn disconnect_mid_session_preserves_survivor() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let handle = orch
            .start_session(synthetic_config(
                dir.path().to_path_buf(),
                "ramp:?seconds=1&chunk_ms=50&paced=false",
                "ramp:?seconds=2&fail_after=0.5&chunk_ms=50&paced=false",
                false,
            ))
            .unwrap();

        // Let the system channel hit its scripted disconnect before the
        // stop lands.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !orch.status(&handle).degraded {
            assert!(std::time::Instant::now() < deadline, "never degraded");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let summary = orch.stop(&handle).unwrap();

        assert_eq!(summary.phase, SessionPhase::Stopped);
        assert!(summary.degraded);
        assert_eq!(summary.combined, CombinedOutcome::Skipped);

        let mic = summary
            .channels
            .iter()
            .find(|c| c.role == ChannelRole::Mic)
            .unwrap();
        let system = summary
            .channels
            .iter()
            .find(|c| c.role == ChannelRole::System)
            .unwrap();

        assert!(!mic.failed);
        assert_eq!(mic.frames_captured, 16_000);
        let (_, mic_frames) = decoded_frames(&mic.directory);
        assert_eq!(mic_frames, 16_000);

        assert!(system.failed);
        assert!(system.error.as_deref().unwrap_or("").contains("disconnect"));
        // Audio captured before the disconnect was sealed and kept.
        let (_, system_frames) = decoded_frames(&system.directory);
        assert_eq!(system_frames, 8_000);
    }

    #[test]
    fn stop_twice_returns_identical_summary() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let spec = "sine:440?seconds=0.5&chunk_ms=100&paced=false";
        let handle = orch
            .start_session(synthetic_config(dir.path().to_path_buf(), spec, spec, false))
            .unwrap();

        let first = orch.stop(&handle).unwrap();
        let second = orch.stop(&handle).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pause_resume_produces_gapless_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        // Paced, unbounded streams so control signals land mid-capture.
        let spec = "sine:440?rate=8000&chunk_ms=50";
        let mut config = synthetic_config(dir.path().to_path_buf(), spec, spec, false);
        config.sample_rate = 8_000;
        config.chunk_seconds = 0.2;
        let handle = orch.start_session(config).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(150));
        orch.pause(&handle).unwrap();
        assert_eq!(orch.status(&handle).phase, SessionPhase::Paused);

        std::thread::sleep(std::time::Duration::from_millis(120));
        orch.resume(&handle).unwrap();
        assert_eq!(orch.status(&handle).phase, SessionPhase::Recording);

        std::thread::sleep(std::time::Duration::from_millis(150));
        let summary = orch.stop(&handle).unwrap();

        assert_eq!(summary.phase, SessionPhase::Stopped);
        for channel in &summary.channels {
            assert!(!channel.failed, "channel {} failed: {:?}", channel.role, channel.error);
            // No gaps, no duplicates: the decoded chunks contain exactly
            // the frames the capturer forwarded, in contiguous files.
            let (count, frames) = decoded_frames(&channel.directory);
            assert_eq!(frames, channel.frames_captured);
            assert!(count >= 2, "pause boundary must have sealed a chunk");
        }
    }

    #[test]
    fn control_calls_in_wrong_phase_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let spec = "sine:440?rate=8000&chunk_ms=50";
        let mut config = synthetic_config(dir.path().to_path_buf(), spec, spec, false);
        config.sample_rate = 8_000;
        let handle = orch.start_session(config).unwrap();

        // Resume while recording is invalid.
        let err = orch.resume(&handle).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidStateTransition(_)));

        orch.stop(&handle).unwrap();

        // Pause after stop is invalid and has no side effects.
        let err = orch.pause(&handle).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidStateTransition(_)));
        assert_eq!(orch.status(&handle).phase, SessionPhase::Stopped);
    }

    #[test]
    fn status_reflects_channel_failure_as_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator();
        let handle = orch
            .start_session(synthetic_config(
                dir.path().to_path_buf(),
                "sine:440?rate=8000&chunk_ms=50",
                "sine:440?rate=8000&chunk_ms=50&fail_after=0.1&paced=false",
                false,
            ))
            .unwrap();

        // Wait for the system channel to hit its scripted disconnect.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let status = orch.status(&handle);
            if status.degraded {
                assert_eq!(status.phase, SessionPhase::Recording);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "never degraded");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let summary = orch.stop(&handle).unwrap();
        assert!(summary.degraded);
        assert_eq!(summary.phase, SessionPhase::Stopped);
    }
}
