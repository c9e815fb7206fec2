//! External collaborators invoked after a session finishes.

pub mod hook;
pub mod notes;
pub mod transcription;

use anyhow::{bail, Result};

pub use hook::{PostSessionHook, ShellCommandHook};
pub use notes::{DummyNotes, NoteDocument, NotesService, OpenAiNotes};
pub use transcription::{DummyTranscription, OpenAiTranscription, Transcript, TranscriptionService};

use crate::config::ServiceSettings;

/// Resolve the configured transcription backend. `None` disables it.
pub fn resolve_transcription(
    settings: &ServiceSettings,
) -> Result<Option<Box<dyn TranscriptionService>>> {
    match settings.transcription_provider.trim().to_lowercase().as_str() {
        "" | "none" | "off" => Ok(None),
        "dummy" => Ok(Some(Box::new(DummyTranscription))),
        "openai" => {
            let Some(api_key) = settings.openai_api_key.clone() else {
                bail!("CONFAB_OPENAI_API_KEY is required for the openai provider");
            };
            Ok(Some(Box::new(OpenAiTranscription::new(
                settings.openai_api_base.clone(),
                api_key,
                settings.transcription_model.clone(),
            ))))
        }
        other => bail!("Unknown transcription provider '{other}'. Supported: none, dummy, openai"),
    }
}

/// Resolve the configured notes backend. `None` disables it.
pub fn resolve_notes(settings: &ServiceSettings) -> Result<Option<Box<dyn NotesService>>> {
    match settings.notes_provider.trim().to_lowercase().as_str() {
        "" | "none" | "off" => Ok(None),
        "dummy" => Ok(Some(Box::new(DummyNotes))),
        "openai" => {
            let Some(api_key) = settings.openai_api_key.clone() else {
                bail!("CONFAB_OPENAI_API_KEY is required for the openai provider");
            };
            Ok(Some(Box::new(OpenAiNotes::new(
                settings.openai_api_base.clone(),
                api_key,
                settings.notes_model.clone(),
            ))))
        }
        other => bail!("Unknown notes provider '{other}'. Supported: none, dummy, openai"),
    }
}
