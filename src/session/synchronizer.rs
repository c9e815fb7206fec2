//! Dual-channel alignment and combined-track production.
//!
//! Active only when a combined track is requested. The synchronizer is a
//! third consumer beside the two per-channel writers: it receives both
//! frame streams, aligns them on the session clock (the first frame's
//! timestamp on each channel establishes that channel's offset), brings
//! both to the session sample rate, and mixes sample-aligned audio into
//! a staged WAV that is committed only at finalization. The leading
//! channel is buffered up to a bounded window; beyond it the laggard is
//! treated as silence so memory stays bounded when one channel stalls.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::collections::VecDeque;
use std::fs::File;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::capture::StreamFormat;
use crate::session::frame::Frame;
use crate::session::mixer::{downmix_mono, resample};
use crate::session::state::ChannelRole;

/// Messages from the capturers. Every channel terminates its stream
/// with `Ended` so the synchronizer knows when to finalize.
pub enum SyncMsg {
    Frame(Frame),
    Ended { role: ChannelRole, failed: bool },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Common output rate; both channels are resampled onto it.
    pub sample_rate: u32,
    pub staging: PathBuf,
    pub target: PathBuf,
    pub mic_format: StreamFormat,
    pub system_format: StreamFormat,
    pub lead_window_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Both channels ran to completion; the track covers the session.
    Complete(PathBuf),
    /// A channel failed mid-session; the track covers what both
    /// channels produced and is flagged rather than silently truncated.
    Incomplete(PathBuf),
    /// The combined track itself could not be written; no artifact.
    Failed(String),
}

#[derive(Debug)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub frames_mixed: u64,
}

pub fn spawn_synchronizer(config: SyncConfig, input: Receiver<SyncMsg>) -> JoinHandle<SyncReport> {
    std::thread::spawn(move || run(config, input))
}

fn run(config: SyncConfig, input: Receiver<SyncMsg>) -> SyncReport {
    match write_combined(&config, input) {
        Ok((frames_mixed, degraded)) => {
            let outcome = if degraded {
                SyncOutcome::Incomplete(config.target.clone())
            } else {
                SyncOutcome::Complete(config.target.clone())
            };
            info!(
                "Combined track committed: {:?} ({} frames)",
                config.target, frames_mixed
            );
            SyncReport {
                outcome,
                frames_mixed,
            }
        }
        Err(message) => {
            warn!("Combined track failed: {}", message);
            let _ = std::fs::remove_file(&config.staging);
            SyncReport {
                outcome: SyncOutcome::Failed(message),
                frames_mixed: 0,
            }
        }
    }
}

fn write_combined(
    config: &SyncConfig,
    input: Receiver<SyncMsg>,
) -> std::result::Result<(u64, bool), String> {
    if let Some(parent) = config.staging.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create {parent:?}: {e}"))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&config.staging, spec)
        .map_err(|e| format!("cannot open {:?}: {e}", config.staging))?;

    let window = (config.lead_window_seconds * config.sample_rate as f64) as u64;
    let mut aligner = AlignedMixer::new(window.max(1));
    let mut frames_mixed: u64 = 0;
    let mut degraded = false;

    loop {
        let msg = match input.recv() {
            Ok(msg) => msg,
            // All senders gone without Ended: finalize what we have.
            Err(_) => break,
        };
        match msg {
            SyncMsg::Frame(frame) => {
                let lane = lane_index(frame.role);
                let rate = match frame.role {
                    ChannelRole::Mic => config.mic_format.sample_rate,
                    ChannelRole::System => config.system_format.sample_rate,
                };
                let mono = downmix_mono(&frame.samples, frame.channels);
                let resampled = resample(&mono, rate, config.sample_rate);
                let start =
                    (frame.timestamp.as_secs_f64() * config.sample_rate as f64).round() as u64;
                aligner.push(lane, start, &resampled);

                frames_mixed +=
                    write_samples(&mut writer, &aligner.drain_ready())? as u64;
            }
            SyncMsg::Ended { role, failed } => {
                debug!("Synchronizer: {} ended (failed: {})", role, failed);
                if failed {
                    // A lost channel truncates the combined track at the
                    // failure point; the summary flags it instead of the
                    // track pretending to cover the whole session. The
                    // surviving channel's own writer is unaffected.
                    degraded = true;
                    break;
                }
                aligner.finish_lane(lane_index(role));
                if aligner.all_finished() {
                    break;
                }
                // A cleanly-ended channel lets the survivor keep mixing;
                // the ended lane contributes its buffered tail, then
                // silence.
                frames_mixed += write_samples(&mut writer, &aligner.drain_ready())? as u64;
            }
        }
    }

    if !degraded {
        frames_mixed += write_samples(&mut writer, &aligner.drain_rest())? as u64;
    }

    writer
        .finalize()
        .map_err(|e| format!("finalize failed: {e}"))?;
    File::open(&config.staging)
        .and_then(|f| f.sync_all())
        .map_err(|e| format!("sync failed: {e}"))?;
    std::fs::rename(&config.staging, &config.target)
        .map_err(|e| format!("cannot commit {:?}: {e}", config.target))?;

    Ok((frames_mixed, degraded))
}

fn write_samples(
    writer: &mut WavWriter<std::io::BufWriter<File>>,
    samples: &[f32],
) -> std::result::Result<usize, String> {
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer
            .write_sample(value)
            .map_err(|e| format!("write failed: {e}"))?;
    }
    Ok(samples.len())
}

fn lane_index(role: ChannelRole) -> usize {
    match role {
        ChannelRole::Mic => 0,
        ChannelRole::System => 1,
    }
}

#[derive(Debug, Default)]
struct Lane {
    started: bool,
    finished: bool,
    /// Output-timeline index of the queue front.
    cursor: u64,
    queue: VecDeque<f32>,
}

impl Lane {
    fn end(&self) -> u64 {
        self.cursor + self.queue.len() as u64
    }
}

/// Sample-aligned two-lane mixer over a shared output timeline.
///
/// Each lane's first push anchors it at its start offset; silence fills
/// everything before an anchor and any region a lane never covered.
struct AlignedMixer {
    lanes: [Lane; 2],
    out_pos: u64,
    window: u64,
}

impl AlignedMixer {
    fn new(window: u64) -> Self {
        Self {
            lanes: [Lane::default(), Lane::default()],
            out_pos: 0,
            window,
        }
    }

    fn push(&mut self, lane: usize, start_frame: u64, samples: &[f32]) {
        let lane = &mut self.lanes[lane];
        if !lane.started {
            lane.started = true;
            // Anything earlier than the current output position was
            // already emitted as silence for this lane.
            lane.cursor = start_frame.max(self.out_pos);
        }
        lane.queue.extend(samples.iter().copied());
    }

    fn finish_lane(&mut self, lane: usize) {
        self.lanes[lane].finished = true;
    }

    fn all_finished(&self) -> bool {
        self.lanes.iter().all(|l| l.finished)
    }

    /// Frames that can be emitted now without starving either live lane,
    /// plus whatever the lead window forces out.
    fn emit_end(&self) -> u64 {
        let mut any_live = false;
        let mut ready = u64::MAX;
        let mut forced = self.out_pos;
        let mut max_end = self.out_pos;

        for lane in &self.lanes {
            if lane.started {
                max_end = max_end.max(lane.end());
            }
            if !lane.finished {
                any_live = true;
                ready = ready.min(if lane.started { lane.end() } else { self.out_pos });
                if lane.started && lane.queue.len() as u64 > self.window {
                    forced = forced.max(lane.end() - self.window);
                }
            }
        }

        if !any_live {
            return max_end;
        }
        ready.max(forced).min(max_end)
    }

    fn drain_ready(&mut self) -> Vec<f32> {
        self.drain_to(self.emit_end())
    }

    /// Flush everything both lanes still hold (after both finished).
    fn drain_rest(&mut self) -> Vec<f32> {
        let end = self
            .lanes
            .iter()
            .filter(|l| l.started)
            .map(Lane::end)
            .max()
            .unwrap_or(self.out_pos);
        self.drain_to(end)
    }

    fn drain_to(&mut self, end: u64) -> Vec<f32> {
        if end <= self.out_pos {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((end - self.out_pos) as usize);
        for pos in self.out_pos..end {
            let mut acc = 0.0f32;
            for lane in &self.lanes {
                if lane.started && pos >= lane.cursor {
                    let idx = (pos - lane.cursor) as usize;
                    acc += lane.queue.get(idx).copied().unwrap_or(0.0);
                }
            }
            out.push((acc * 0.5).clamp(-1.0, 1.0));
        }

        for lane in &mut self.lanes {
            if !lane.started || end <= lane.cursor {
                continue;
            }
            let take = ((end - lane.cursor) as usize).min(lane.queue.len());
            lane.queue.drain(..take);
            lane.cursor = end;
        }
        self.out_pos = end;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::PcmChunk;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn aligned_lanes_average() {
        let mut mixer = AlignedMixer::new(1_000);
        mixer.push(0, 0, &[0.5, 0.5, 0.5, 0.5]);
        assert!(mixer.drain_ready().is_empty()); // lane 1 not anchored yet
        mixer.push(1, 0, &[0.5, 0.5, 0.5, 0.5]);
        let mixed = mixer.drain_ready();
        assert_eq!(mixed, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn later_start_is_padded_with_silence() {
        let mut mixer = AlignedMixer::new(1_000);
        mixer.push(0, 0, &[1.0, 1.0, 1.0, 1.0]);
        mixer.push(1, 2, &[1.0, 1.0]);
        let mixed = mixer.drain_ready();
        assert_eq!(mixed, vec![0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn lead_window_bounds_buffering() {
        let mut mixer = AlignedMixer::new(2);
        mixer.push(0, 0, &[1.0; 5]);
        // Lane 1 never produced anything: only the excess beyond the
        // window is forced out, mixed against silence.
        let mixed = mixer.drain_ready();
        assert_eq!(mixed, vec![0.5, 0.5, 0.5]);
        assert_eq!(mixer.lanes[0].queue.len(), 2);
    }

    #[test]
    fn finished_lanes_flush_their_tail() {
        let mut mixer = AlignedMixer::new(1_000);
        mixer.push(0, 0, &[1.0, 1.0, 1.0, 1.0]);
        mixer.push(1, 0, &[1.0, 1.0]);
        mixer.finish_lane(1);
        mixer.finish_lane(0);
        let mixed = mixer.drain_rest();
        assert_eq!(mixed, vec![1.0, 1.0, 0.5, 0.5]);
    }

    fn frame(role: ChannelRole, seq: u64, millis: u64, samples: Vec<f32>) -> SyncMsg {
        SyncMsg::Frame(Frame::new(
            role,
            seq,
            Duration::from_millis(millis),
            PcmChunk {
                samples,
                channels: 1,
            },
        ))
    }

    fn config(dir: &std::path::Path) -> SyncConfig {
        let format = StreamFormat {
            sample_rate: 1_000,
            channels: 1,
        };
        SyncConfig {
            sample_rate: 1_000,
            staging: dir.join("combined.wav.partial"),
            target: dir.join("combined.wav"),
            mic_format: format,
            system_format: format,
            lead_window_seconds: 10.0,
        }
    }

    #[test]
    fn produces_complete_combined_track() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(64);
        let handle = spawn_synchronizer(config(dir.path()), rx);

        for seq in 0..4u64 {
            tx.send(frame(ChannelRole::Mic, seq, seq * 100, vec![0.4; 100]))
                .unwrap();
            tx.send(frame(ChannelRole::System, seq, seq * 100, vec![0.4; 100]))
                .unwrap();
        }
        tx.send(SyncMsg::Ended {
            role: ChannelRole::Mic,
            failed: false,
        })
        .unwrap();
        tx.send(SyncMsg::Ended {
            role: ChannelRole::System,
            failed: false,
        })
        .unwrap();

        let report = handle.join().unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Complete(_)));
        assert_eq!(report.frames_mixed, 400);

        let reader = hound::WavReader::open(dir.path().join("combined.wav")).unwrap();
        assert_eq!(reader.len(), 400);
        assert!(!dir.path().join("combined.wav.partial").exists());
    }

    #[test]
    fn failed_channel_marks_track_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(64);
        let handle = spawn_synchronizer(config(dir.path()), rx);

        tx.send(frame(ChannelRole::Mic, 0, 0, vec![0.4; 100])).unwrap();
        tx.send(frame(ChannelRole::System, 0, 0, vec![0.4; 50])).unwrap();
        tx.send(SyncMsg::Ended {
            role: ChannelRole::System,
            failed: true,
        })
        .unwrap();
        // The synchronizer may already have shut down; later traffic
        // from the surviving channel is simply dropped.
        let _ = tx.send(frame(ChannelRole::Mic, 1, 100, vec![0.4; 100]));
        let _ = tx.send(SyncMsg::Ended {
            role: ChannelRole::Mic,
            failed: false,
        });

        let report = handle.join().unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Incomplete(_)));
        // Production stops at the failure point: only the span both
        // channels covered is in the track.
        assert_eq!(report.frames_mixed, 50);
        assert!(dir.path().join("combined.wav").exists());
        let reader = hound::WavReader::open(dir.path().join("combined.wav")).unwrap();
        assert_eq!(reader.len(), 50);
    }
}
