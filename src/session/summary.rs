//! Session status and terminal summary records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::capture::{BackendKind, StreamFormat};
use crate::session::state::{CapturerState, ChannelRole, SessionPhase};

/// Live view of a session, safe to read concurrently with control calls.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: SessionPhase,
    pub started_at: DateTime<Utc>,
    pub channels: Vec<ChannelStatus>,
    /// Still recording, but at least one channel has failed.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub role: ChannelRole,
    pub state: CapturerState,
    pub error: Option<String>,
}

/// Terminal outcome of the combined track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "path")]
pub enum CombinedOutcome {
    /// Mixing was not requested, or the track could not be produced.
    Skipped,
    Complete(PathBuf),
    /// A channel failed mid-session; the track covers only the overlap.
    Incomplete(PathBuf),
}

/// Per-channel slice of the terminal summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub role: ChannelRole,
    pub backend: BackendKind,
    pub format: StreamFormat,
    pub directory: PathBuf,
    pub chunks_sealed: u32,
    pub frames_captured: u64,
    pub duration_seconds: f64,
    pub failed: bool,
    pub error: Option<String>,
}

/// The record a session leaves behind. Stable: calling `stop` again
/// returns the identical summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub base_dir: PathBuf,
    pub channels: Vec<ChannelSummary>,
    pub combined: CombinedOutcome,
    /// The session kept recording after losing a channel.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl SessionSummary {
    /// A clean stop: terminal, nothing failed, nothing degraded.
    pub fn is_clean(&self) -> bool {
        self.phase == SessionPhase::Stopped && !self.degraded && self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> SessionSummary {
        SessionSummary {
            session_id: "session-abc123".to_string(),
            name: Some("standup".to_string()),
            created_at: Utc::now(),
            phase: SessionPhase::Stopped,
            sample_rate: 16_000,
            duration_seconds: 3.2,
            base_dir: PathBuf::from("/tmp/recordings"),
            channels: vec![ChannelSummary {
                role: ChannelRole::Mic,
                backend: BackendKind::Synthetic,
                format: StreamFormat {
                    sample_rate: 16_000,
                    channels: 1,
                },
                directory: PathBuf::from("/tmp/recordings/session-abc123/raw/mic"),
                chunks_sealed: 4,
                frames_captured: 51_200,
                duration_seconds: 3.2,
                failed: false,
                error: None,
            }],
            combined: CombinedOutcome::Skipped,
            degraded: false,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn summary_round_trips_through_json() {
        let original = summary();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: SessionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn combined_outcome_serializes_with_status_tag() {
        let json =
            serde_json::to_string(&CombinedOutcome::Complete(PathBuf::from("/x/combined.wav")))
                .unwrap();
        assert!(json.contains("\"status\":\"complete\""));
        let skipped = serde_json::to_string(&CombinedOutcome::Skipped).unwrap();
        assert!(skipped.contains("skipped"));
    }

    #[test]
    fn clean_flag_reflects_degradation() {
        let mut s = summary();
        assert!(s.is_clean());
        s.degraded = true;
        assert!(!s.is_clean());
    }
}
