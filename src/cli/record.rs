//! The `record` command: drive one session from the terminal.
//!
//! Interactive controls while recording: `p` pauses, `r` resumes, `q`
//! (or Ctrl-C) stops. After the session finalizes, the summary is
//! persisted and the optional transcription/notes/hook collaborators run.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::args::RecordArgs;
use crate::config::Settings;
use crate::services;
use crate::services::hook::{PostSessionHook, ShellCommandHook};
use crate::session::{
    CombinedOutcome, SessionConfig, SessionOrchestrator, SessionPhase, SessionSummary,
};
use crate::storage::SessionStore;

pub async fn handle_record_command(args: RecordArgs, settings: Settings) -> Result<()> {
    let mut config = SessionConfig::from_settings(&settings);
    config.name = args.title.clone();
    if let Some(mix) = args.mix {
        config.mix_down = mix;
    }
    if let Some(chunk_seconds) = args.chunk_seconds {
        config.chunk_seconds = chunk_seconds;
    }
    if let Some(backend) = &args.backend {
        let kind = backend.parse().context("Invalid --backend")?;
        for input in &mut config.inputs {
            input.backend = kind;
        }
    }
    if args.mic_device.is_some() || args.system_device.is_some() {
        for input in &mut config.inputs {
            match input.role {
                crate::session::ChannelRole::Mic => {
                    if let Some(device) = &args.mic_device {
                        input.device = Some(device.clone());
                    }
                }
                crate::session::ChannelRole::System => {
                    if let Some(device) = &args.system_device {
                        input.device = Some(device.clone());
                    }
                }
            }
        }
    }

    let orchestrator = Arc::new(SessionOrchestrator::new(&settings));
    let handle = orchestrator.start_session(config)?;

    println!("Recording session {}", handle.session_id());
    println!("  directory: {:?}", handle.session_dir());
    println!("  controls: [p]ause  [r]esume  [s]tatus  [q]uit  (Ctrl-C stops)");

    wait_for_stop(&orchestrator, &handle, args.duration).await;

    let orch = Arc::clone(&orchestrator);
    let stop_handle = handle.clone();
    let summary = tokio::task::spawn_blocking(move || orch.stop(&stop_handle))
        .await
        .context("stop task panicked")??;

    print_summary(&summary);

    if let Err(e) = persist_summary(&settings, &summary) {
        warn!("Failed to persist session summary: {}", e);
    }

    run_collaborators(&settings, &summary).await;

    Ok(())
}

async fn wait_for_stop(
    orchestrator: &Arc<SessionOrchestrator>,
    handle: &crate::session::SessionHandle,
    duration: Option<f64>,
) {
    let deadline = duration.map(|secs| tokio::time::sleep(std::time::Duration::from_secs_f64(secs)));
    tokio::pin!(deadline);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = async {
                match deadline.as_mut().as_pin_mut() {
                    Some(sleep) => sleep.await,
                    None => std::future::pending().await,
                }
            } => {
                info!("Requested duration reached; stopping");
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Interrupted; stopping");
                return;
            }
            line = lines.next_line(), if stdin_open => {
                let Ok(Some(line)) = line else {
                    // stdin closed (piped invocation); keep recording
                    // until the deadline or Ctrl-C.
                    stdin_open = false;
                    continue;
                };
                match line.trim() {
                    "p" => match orchestrator.pause(handle) {
                        Ok(()) => println!("Paused."),
                        Err(e) => println!("Cannot pause: {e}"),
                    },
                    "r" => match orchestrator.resume(handle) {
                        Ok(()) => println!("Recording."),
                        Err(e) => println!("Cannot resume: {e}"),
                    },
                    "s" => print_status(&orchestrator.status(handle)),
                    "q" => return,
                    "" => {}
                    other => println!("Unknown command '{other}' (p/r/s/q)"),
                }
            }
        }
    }
}

fn print_status(status: &crate::session::SessionStatus) {
    let mut line = format!("{}: {}", status.session_id, status.phase.as_str());
    if status.degraded {
        line.push_str(" (degraded)");
    }
    println!("{line}");
    for channel in &status.channels {
        match &channel.error {
            Some(error) => println!("  {}: {} ({error})", channel.role, channel.state.as_str()),
            None => println!("  {}: {}", channel.role, channel.state.as_str()),
        }
    }
}

fn print_summary(summary: &SessionSummary) {
    println!();
    println!(
        "Session {} {} after {:.1}s",
        summary.session_id,
        summary.phase.as_str(),
        summary.duration_seconds
    );
    for channel in &summary.channels {
        let state = if channel.failed { "failed" } else { "ok" };
        println!(
            "  {}: {} chunk(s), {:.1}s, {} [{}]",
            channel.role,
            channel.chunks_sealed,
            channel.duration_seconds,
            state,
            channel.directory.display(),
        );
        if let Some(error) = &channel.error {
            println!("    error: {error}");
        }
    }
    match &summary.combined {
        CombinedOutcome::Complete(path) => println!("  combined: {}", path.display()),
        CombinedOutcome::Incomplete(path) => {
            println!("  combined (incomplete): {}", path.display())
        }
        CombinedOutcome::Skipped => println!("  combined: skipped"),
    }
    for warning in &summary.warnings {
        println!("  warning: {warning}");
    }
}

fn persist_summary(settings: &Settings, summary: &SessionSummary) -> Result<()> {
    let store = SessionStore::open(&settings.database_path)?;
    store.save_summary(summary)?;
    info!("Session summary saved to {:?}", settings.database_path);
    Ok(())
}

/// Run the post-terminal-state collaborators: transcription, notes, and
/// the shell hook. Failures here never affect the recorded session.
async fn run_collaborators(settings: &Settings, summary: &SessionSummary) {
    if summary.phase == SessionPhase::Failed {
        info!("Session failed; skipping transcription and notes");
    } else if let Some(transcript) = run_transcription(settings, summary).await {
        run_notes(settings, summary, &transcript).await;
    }

    if !settings.hook.post_command.is_empty() {
        let hook = ShellCommandHook::new(
            settings.hook.post_command.clone(),
            settings.hook.post_command_timeout_seconds,
        );
        if let Err(e) = hook.execute(summary).await {
            warn!("Post-session hook failed: {}", e);
        }
    }
}

fn combined_path(summary: &SessionSummary) -> Option<std::path::PathBuf> {
    match &summary.combined {
        CombinedOutcome::Complete(path) | CombinedOutcome::Incomplete(path) => Some(path.clone()),
        CombinedOutcome::Skipped => None,
    }
}

async fn run_transcription(
    settings: &Settings,
    summary: &SessionSummary,
) -> Option<services::Transcript> {
    let transcription = match services::resolve_transcription(&settings.transcription) {
        Ok(Some(service)) => service,
        Ok(None) => return None,
        Err(e) => {
            warn!("Transcription provider unavailable: {}", e);
            return None;
        }
    };

    let Some(path) = combined_path(summary) else {
        info!("No combined track to transcribe; skipping transcription");
        return None;
    };

    let transcript = match transcription.transcribe(&summary.session_id, &path).await {
        Ok(transcript) => transcript,
        Err(e) => {
            warn!("Transcription failed: {}", e);
            return None;
        }
    };

    let transcript_path = path.with_extension("txt");
    match std::fs::write(&transcript_path, &transcript.text) {
        Ok(()) => println!("  transcript: {}", transcript_path.display()),
        Err(e) => warn!("Failed to write transcript file: {}", e),
    }
    Some(transcript)
}

async fn run_notes(settings: &Settings, summary: &SessionSummary, transcript: &services::Transcript) {
    let notes = match services::resolve_notes(&settings.transcription) {
        Ok(Some(service)) => service,
        Ok(None) => return,
        Err(e) => {
            warn!("Notes provider unavailable: {}", e);
            return;
        }
    };

    let name = summary
        .name
        .clone()
        .unwrap_or_else(|| summary.session_id.clone());
    let document = match notes
        .generate_notes(&summary.session_id, &name, std::slice::from_ref(transcript))
        .await
    {
        Ok(document) => document,
        Err(e) => {
            warn!("Notes generation failed: {}", e);
            return;
        }
    };

    let Some(path) = combined_path(summary) else { return };
    let notes_path = path.with_extension("notes.md");
    let body = format!("# {}\n\n{}\n", document.title, document.summary);
    match std::fs::write(&notes_path, body) {
        Ok(()) => println!("  notes: {}", notes_path.display()),
        Err(e) => warn!("Failed to write notes file: {}", e),
    }
}
