//! Chunked, append-only persistence for one capture channel.
//!
//! Frames arrive in strict sequence order and are appended to the open
//! chunk until its duration target is reached, at which point the chunk
//! is sealed: finalized, flushed to disk, and renamed from its staging
//! name to its final name. A chunk file is therefore never visible under
//! its final name with partial contents — a crash mid-write leaves at
//! most one incomplete `.partial` file and zero corrupted sealed chunks.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{RecorderError, Result};
use crate::session::frame::Frame;
use crate::session::mixer::downmix_mono;
use crate::session::state::ChannelRole;

/// Staging suffix for chunks that have not been sealed yet.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Messages consumed by a writer thread. `Seal` closes the open chunk
/// early (pause boundary); `Finish` seals and shuts the writer down.
pub enum WriterMsg {
    Frame(Frame),
    Seal,
    Finish,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub role: ChannelRole,
    pub directory: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per chunk before it is sealed.
    pub chunk_frames: u64,
}

#[derive(Debug, Clone)]
pub struct WriterReport {
    pub role: ChannelRole,
    pub chunks_sealed: u32,
    pub frames_written: u64,
    pub error: Option<RecorderError>,
}

impl WriterReport {
    pub fn duration_seconds(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.frames_written as f64 / sample_rate as f64
    }
}

/// Spawn the writer thread for one channel. The thread drains its queue
/// until `Finish`, so a capturer blocked on a full queue always makes
/// progress even after a storage failure.
pub fn spawn_chunk_writer(
    config: WriterConfig,
    frames: Receiver<WriterMsg>,
) -> JoinHandle<WriterReport> {
    std::thread::spawn(move || ChunkWriter::new(config).run(frames))
}

struct OpenChunk {
    writer: WavWriter<BufWriter<File>>,
    staging: PathBuf,
    target: PathBuf,
    frames: u64,
}

struct ChunkWriter {
    config: WriterConfig,
    open: Option<OpenChunk>,
    next_index: u32,
    expected_seq: u64,
    chunks_sealed: u32,
    frames_written: u64,
    error: Option<RecorderError>,
}

impl ChunkWriter {
    fn new(config: WriterConfig) -> Self {
        Self {
            config,
            open: None,
            next_index: 0,
            expected_seq: 0,
            chunks_sealed: 0,
            frames_written: 0,
            error: None,
        }
    }

    fn run(mut self, frames: Receiver<WriterMsg>) -> WriterReport {
        if let Err(e) = std::fs::create_dir_all(&self.config.directory) {
            self.fail(RecorderError::storage(format!(
                "cannot create {:?}: {e}",
                self.config.directory
            )));
        }

        while let Ok(msg) = frames.recv() {
            match msg {
                WriterMsg::Frame(frame) => self.handle_frame(frame),
                WriterMsg::Seal => {
                    if let Err(e) = self.seal() {
                        self.fail(e);
                    }
                }
                WriterMsg::Finish => break,
            }
        }

        if let Err(e) = self.seal() {
            self.fail(e);
        }

        info!(
            "Writer for {} finished: {} chunk(s), {} frame(s)",
            self.config.role, self.chunks_sealed, self.frames_written
        );

        WriterReport {
            role: self.config.role,
            chunks_sealed: self.chunks_sealed,
            frames_written: self.frames_written,
            error: self.error,
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        let seq = frame.seq;
        if seq != self.expected_seq {
            let expected = self.expected_seq;
            self.fail(RecorderError::storage(format!(
                "frame sequence discontinuity on {}: expected {expected}, got {seq}",
                self.config.role
            )));
            self.expected_seq = seq + 1;
            return;
        }
        self.expected_seq += 1;

        // After a failure the queue is still drained, but nothing is
        // written; sealed chunks stay as they are.
        if self.error.is_some() {
            return;
        }

        if let Err(e) = self.append(&frame) {
            self.fail(e);
        }
    }

    fn append(&mut self, frame: &Frame) -> Result<()> {
        if self.open.is_none() {
            self.open_chunk()?;
        }
        let open = self.open.as_mut().expect("chunk was just opened");

        let samples = adapt_channels(frame, self.config.channels);
        for &sample in &samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            open.writer
                .write_sample(value)
                .map_err(|e| RecorderError::storage(format!("write failed: {e}")))?;
        }

        let appended = samples.len() as u64 / self.config.channels.max(1) as u64;
        open.frames += appended;
        self.frames_written += appended;

        if open.frames >= self.config.chunk_frames {
            self.seal()?;
        }
        Ok(())
    }

    fn open_chunk(&mut self) -> Result<()> {
        let target = self
            .config
            .directory
            .join(format!("chunk-{:05}.wav", self.next_index));
        let staging = target.with_extension(format!("wav{PARTIAL_SUFFIX}"));

        let spec = WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&staging, spec)
            .map_err(|e| RecorderError::storage(format!("cannot open {staging:?}: {e}")))?;

        debug!("Opened chunk {:?} for {}", staging, self.config.role);
        self.next_index += 1;
        self.open = Some(OpenChunk {
            writer,
            staging,
            target,
            frames: 0,
        });
        Ok(())
    }

    /// Seal the open chunk: finalize, flush to disk, then commit it
    /// under its final name.
    fn seal(&mut self) -> Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };

        open.writer
            .finalize()
            .map_err(|e| RecorderError::storage(format!("finalize failed: {e}")))?;

        // Make sure every byte is on disk before the chunk becomes
        // visible under its final name.
        File::open(&open.staging)
            .and_then(|file| file.sync_all())
            .map_err(|e| RecorderError::storage(format!("sync failed: {e}")))?;

        std::fs::rename(&open.staging, &open.target).map_err(|e| {
            RecorderError::storage(format!("cannot commit {:?}: {e}", open.target))
        })?;

        debug!(
            "Sealed chunk {:?} ({} frames) for {}",
            open.target, open.frames, self.config.role
        );
        self.chunks_sealed += 1;
        Ok(())
    }

    fn fail(&mut self, err: RecorderError) {
        error!("Writer for {} failed: {}", self.config.role, err);
        if let Some(open) = self.open.take() {
            // Abandon the staged chunk; sealed chunks are untouched.
            let _ = std::fs::remove_file(&open.staging);
        }
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

fn adapt_channels(frame: &Frame, wanted: u16) -> Vec<f32> {
    if frame.channels == wanted {
        return frame.samples.to_vec();
    }
    if wanted == 1 {
        return downmix_mono(&frame.samples, frame.channels);
    }
    if frame.channels == 1 {
        let mut out = Vec::with_capacity(frame.samples.len() * wanted as usize);
        for &sample in frame.samples.iter() {
            for _ in 0..wanted {
                out.push(sample);
            }
        }
        return out;
    }
    // Unusual layouts collapse through mono.
    let mono = downmix_mono(&frame.samples, frame.channels);
    let mut out = Vec::with_capacity(mono.len() * wanted as usize);
    for sample in mono {
        for _ in 0..wanted {
            out.push(sample);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::PcmChunk;
    use std::sync::mpsc;
    use std::time::Duration;

    fn frame(seq: u64, frames: usize) -> Frame {
        Frame::new(
            ChannelRole::Mic,
            seq,
            Duration::from_millis(seq * 10),
            PcmChunk {
                samples: vec![0.25; frames],
                channels: 1,
            },
        )
    }

    fn config(dir: &std::path::Path, chunk_frames: u64) -> WriterConfig {
        WriterConfig {
            role: ChannelRole::Mic,
            directory: dir.to_path_buf(),
            sample_rate: 1_000,
            channels: 1,
            chunk_frames,
        }
    }

    fn wav_files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn seals_at_duration_target() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(16);
        let handle = spawn_chunk_writer(config(dir.path(), 100), rx);

        for seq in 0..5 {
            tx.send(WriterMsg::Frame(frame(seq, 50))).unwrap();
        }
        tx.send(WriterMsg::Finish).unwrap();
        let report = handle.join().unwrap();

        assert!(report.error.is_none());
        assert_eq!(report.chunks_sealed, 3);
        assert_eq!(report.frames_written, 250);
        assert_eq!(
            wav_files(dir.path()),
            vec!["chunk-00000.wav", "chunk-00001.wav", "chunk-00002.wav"]
        );

        // 100 + 100 + 50 frames, in order, all committed.
        let lengths: Vec<u32> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("chunk-{i:05}.wav"));
                hound::WavReader::open(path).unwrap().len()
            })
            .collect();
        assert_eq!(lengths, vec![100, 100, 50]);
    }

    #[test]
    fn seal_message_closes_short_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(16);
        let handle = spawn_chunk_writer(config(dir.path(), 1_000), rx);

        tx.send(WriterMsg::Frame(frame(0, 30))).unwrap();
        tx.send(WriterMsg::Seal).unwrap();
        tx.send(WriterMsg::Frame(frame(1, 30))).unwrap();
        tx.send(WriterMsg::Finish).unwrap();
        let report = handle.join().unwrap();

        assert!(report.error.is_none());
        assert_eq!(report.chunks_sealed, 2);
        assert_eq!(
            wav_files(dir.path()),
            vec!["chunk-00000.wav", "chunk-00001.wav"]
        );
    }

    #[test]
    fn no_partial_files_remain_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(16);
        let handle = spawn_chunk_writer(config(dir.path(), 64), rx);

        for seq in 0..10 {
            tx.send(WriterMsg::Frame(frame(seq, 40))).unwrap();
        }
        tx.send(WriterMsg::Finish).unwrap();
        let report = handle.join().unwrap();

        assert!(report.error.is_none());
        let names = wav_files(dir.path());
        assert!(names.iter().all(|n| !n.ends_with(PARTIAL_SUFFIX)));
        assert_eq!(names.len() as u32, report.chunks_sealed);
    }

    #[test]
    fn sequence_gap_fails_writer_but_keeps_sealed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(16);
        let handle = spawn_chunk_writer(config(dir.path(), 50), rx);

        tx.send(WriterMsg::Frame(frame(0, 50))).unwrap(); // seals chunk 0
        tx.send(WriterMsg::Frame(frame(2, 50))).unwrap(); // gap: seq 1 missing
        tx.send(WriterMsg::Frame(frame(3, 50))).unwrap(); // drained, not written
        tx.send(WriterMsg::Finish).unwrap();
        let report = handle.join().unwrap();

        assert!(matches!(
            report.error,
            Some(RecorderError::StorageWriteFailure(_))
        ));
        assert_eq!(report.chunks_sealed, 1);
        assert_eq!(report.frames_written, 50);
        assert_eq!(wav_files(dir.path()), vec!["chunk-00000.wav"]);
    }

    #[test]
    fn empty_session_produces_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::sync_channel(4);
        let handle = spawn_chunk_writer(config(dir.path(), 100), rx);

        tx.send(WriterMsg::Seal).unwrap();
        tx.send(WriterMsg::Finish).unwrap();
        let report = handle.join().unwrap();

        assert!(report.error.is_none());
        assert_eq!(report.chunks_sealed, 0);
        assert!(wav_files(dir.path()).is_empty());
    }
}
