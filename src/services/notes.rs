//! Note synthesis collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::services::transcription::Transcript;

/// Synthesized meeting notes for one session.
#[derive(Debug, Clone)]
pub struct NoteDocument {
    pub session_id: String,
    pub title: String,
    pub summary: String,
    pub action_items: Vec<String>,
}

#[async_trait]
pub trait NotesService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate_notes(
        &self,
        session_id: &str,
        session_name: &str,
        transcripts: &[Transcript],
    ) -> Result<NoteDocument>;
}

/// Offline placeholder: first lines of the transcript as the summary.
pub struct DummyNotes;

#[async_trait]
impl NotesService for DummyNotes {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn generate_notes(
        &self,
        session_id: &str,
        session_name: &str,
        transcripts: &[Transcript],
    ) -> Result<NoteDocument> {
        let combined: String = transcripts
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mut summary: String = combined.chars().take(280).collect();
        if combined.chars().count() > 280 {
            summary.push_str("...");
        }
        Ok(NoteDocument {
            session_id: session_id.to_string(),
            title: format!("Notes for {session_name}"),
            summary: if summary.is_empty() {
                "No transcript available.".to_string()
            } else {
                summary
            },
            action_items: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI-compatible chat completion endpoint.
pub struct OpenAiNotes {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiNotes {
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
impl NotesService for OpenAiNotes {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate_notes(
        &self,
        session_id: &str,
        session_name: &str,
        transcripts: &[Transcript],
    ) -> Result<NoteDocument> {
        let transcript_text: String = transcripts
            .iter()
            .filter(|t| !t.text.is_empty())
            .map(|t| format!("[{}] {}", t.channel, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        info!("Requesting notes for session {}", session_id);

        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "Summarise the meeting transcript, list key points and action items",
                },
                {
                    "role": "user",
                    "content": transcript_text,
                }
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send notes request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;
        if !status.is_success() {
            anyhow::bail!("Notes request failed with status {status}: {text}");
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("Failed to parse notes response")?;
        let summary = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(NoteDocument {
            session_id: session_id.to_string(),
            title: format!("Notes for {session_name}"),
            summary,
            action_items: Vec::new(),
        })
    }
}
