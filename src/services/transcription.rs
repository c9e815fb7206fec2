//! Transcription collaborators.
//!
//! Invoked only after a session reaches a terminal state; the recording
//! core never blocks on them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// One transcribed audio artifact.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub session_id: String,
    /// Which artifact produced this text ("mic", "system", "combined").
    pub channel: String,
    pub text: String,
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(&self, session_id: &str, audio_path: &Path) -> Result<Transcript>;
}

/// Offline placeholder; useful for wiring tests and demo runs.
pub struct DummyTranscription;

#[async_trait]
impl TranscriptionService for DummyTranscription {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn transcribe(&self, session_id: &str, audio_path: &Path) -> Result<Transcript> {
        Ok(Transcript {
            session_id: session_id.to_string(),
            channel: channel_from_path(audio_path),
            text: format!(
                "Dummy transcript for session '{}' from {}. Replace with a real \
                 transcription backend.",
                session_id,
                audio_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct OpenAiTranscription {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscription {
    pub fn new(api_base: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl TranscriptionService for OpenAiTranscription {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn transcribe(&self, session_id: &str, audio_path: &Path) -> Result<Transcript> {
        info!("Transcribing {:?} with model {}", audio_path, self.model);

        let bytes = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read {audio_path:?}"))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("audio/wav")?,
            );

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to send transcription request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        if !status.is_success() {
            anyhow::bail!("Transcription request failed with status {status}: {body}");
        }

        let parsed: TranscriptionResponse =
            serde_json::from_str(&body).context("Failed to parse transcription response")?;

        Ok(Transcript {
            session_id: session_id.to_string(),
            channel: channel_from_path(audio_path),
            text: parsed.text,
        })
    }
}

fn channel_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dummy_transcription_names_the_artifact() {
        let transcript = DummyTranscription
            .transcribe("session-1234", Path::new("/tmp/x/combined.wav"))
            .await
            .unwrap();
        assert_eq!(transcript.channel, "combined");
        assert!(transcript.text.contains("session-1234"));
    }
}
