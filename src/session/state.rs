//! Session and channel state types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::capture::BackendKind;
use crate::config::Settings;

/// Logical audio source within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Mic,
    System,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mic => "mic",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel capturer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturerState {
    Idle,
    Opening,
    Capturing,
    Paused,
    Closing,
    Closed,
    Failed,
}

impl CapturerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Capturing => "capturing",
            Self::Paused => "paused",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Session lifecycle, as reported by `status` and the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Recording,
    Paused,
    Stopped,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// One capture channel requested for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub role: ChannelRole,
    pub backend: BackendKind,
    /// Backend-specific device specification; `None` selects the default.
    pub device: Option<String>,
}

/// Everything needed to start a recording session. Immutable once the
/// session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Target duration of one sealed chunk, in seconds.
    pub chunk_seconds: f64,
    pub base_dir: PathBuf,
    pub inputs: Vec<ChannelConfig>,
    /// Produce a time-aligned combined track at finalization.
    pub mix_down: bool,
}

impl SessionConfig {
    /// Build the standard mic + system configuration from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            name: None,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            chunk_seconds: settings.chunk_seconds,
            base_dir: settings.base_dir.clone(),
            inputs: vec![
                ChannelConfig {
                    role: ChannelRole::Mic,
                    backend: settings.audio_backend,
                    device: settings.mic_device.clone(),
                },
                ChannelConfig {
                    role: ChannelRole::System,
                    backend: settings.audio_backend,
                    device: settings.system_device.clone(),
                },
            ],
            mix_down: settings.mix_down,
        }
    }

    /// Frames per chunk at the given channel sample rate.
    pub fn chunk_frames(&self, sample_rate: u32) -> u64 {
        ((sample_rate as f64 * self.chunk_seconds.max(0.001)) as u64).max(1)
    }
}
