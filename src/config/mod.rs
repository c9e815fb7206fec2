//! Application settings loaded from environment variables.
//!
//! This is a thin adapter: parse, apply defaults, nothing persisted.
//! Every knob uses the `CONFAB_` prefix.

use serde::Serialize;
use std::path::PathBuf;

use crate::audio::capture::BackendKind;
use crate::global;

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Base directory for per-session recording trees.
    pub base_dir: PathBuf,
    /// SQLite database for finished-session summaries.
    pub database_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Target duration of one sealed chunk, in seconds.
    pub chunk_seconds: f64,
    pub audio_backend: BackendKind,
    pub mic_device: Option<String>,
    pub system_device: Option<String>,
    pub ffmpeg_binary: String,
    pub session_prefix: String,
    /// Produce a combined mic+system track at finalization.
    pub mix_down: bool,
    pub transcription: ServiceSettings,
    pub hook: HookSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSettings {
    /// Provider name: "none", "dummy", or "openai".
    pub transcription_provider: String,
    pub notes_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub transcription_model: String,
    pub notes_model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookSettings {
    /// Shell command run after a session reaches a terminal state.
    /// Empty disables the hook.
    pub post_command: String,
    pub post_command_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: global::recordings_dir().unwrap_or_else(|_| PathBuf::from("recordings")),
            database_path: global::db_file().unwrap_or_else(|_| PathBuf::from("confab.db")),
            sample_rate: 16_000,
            channels: 1,
            chunk_seconds: 1.0,
            audio_backend: BackendKind::Cpal,
            mic_device: None,
            system_device: None,
            ffmpeg_binary: "ffmpeg".to_string(),
            session_prefix: "session".to_string(),
            mix_down: true,
            transcription: ServiceSettings::default(),
            hook: HookSettings::default(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            transcription_provider: "none".to_string(),
            notes_provider: "none".to_string(),
            openai_api_key: None,
            openai_api_base: "https://api.openai.com/v1".to_string(),
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            notes_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            post_command: String::new(),
            post_command_timeout_seconds: 3600,
        }
    }
}

impl Settings {
    /// Load settings from `CONFAB_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(dir) = env_var("CONFAB_BASE_DIR") {
            settings.base_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_var("CONFAB_DB_PATH") {
            settings.database_path = PathBuf::from(path);
        }
        if let Some(rate) = parse_env("CONFAB_SAMPLE_RATE") {
            settings.sample_rate = rate;
        }
        if let Some(channels) = parse_env("CONFAB_CHANNELS") {
            settings.channels = channels;
        }
        if let Some(seconds) = parse_env("CONFAB_CHUNK_SECONDS") {
            settings.chunk_seconds = seconds;
        }
        if let Some(backend) = env_var("CONFAB_AUDIO_BACKEND") {
            match backend.parse() {
                Ok(kind) => settings.audio_backend = kind,
                Err(_) => tracing::warn!("Unknown CONFAB_AUDIO_BACKEND '{}', keeping default", backend),
            }
        }
        settings.mic_device = env_var("CONFAB_MIC_DEVICE");
        settings.system_device = env_var("CONFAB_SYSTEM_DEVICE");
        if let Some(binary) = env_var("CONFAB_FFMPEG_BINARY") {
            settings.ffmpeg_binary = binary;
        }
        if let Some(prefix) = env_var("CONFAB_SESSION_PREFIX") {
            settings.session_prefix = prefix;
        }
        if let Some(mix) = parse_env("CONFAB_MIX_DOWN") {
            settings.mix_down = mix;
        }

        if let Some(provider) = env_var("CONFAB_TRANSCRIPTION_PROVIDER") {
            settings.transcription.transcription_provider = provider;
        }
        if let Some(provider) = env_var("CONFAB_NOTES_PROVIDER") {
            settings.transcription.notes_provider = provider;
        }
        settings.transcription.openai_api_key = env_var("CONFAB_OPENAI_API_KEY");
        if let Some(base) = env_var("CONFAB_OPENAI_API_BASE") {
            settings.transcription.openai_api_base = base;
        }
        if let Some(model) = env_var("CONFAB_TRANSCRIPTION_MODEL") {
            settings.transcription.transcription_model = model;
        }
        if let Some(model) = env_var("CONFAB_NOTES_MODEL") {
            settings.transcription.notes_model = model;
        }

        if let Some(command) = env_var("CONFAB_POST_COMMAND") {
            settings.hook.post_command = command;
        }
        if let Some(timeout) = parse_env("CONFAB_POST_COMMAND_TIMEOUT_SECONDS") {
            settings.hook.post_command_timeout_seconds = timeout;
        }

        settings
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}
