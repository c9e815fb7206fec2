//! Post-session hook abstraction and shell command implementation.
//!
//! After a session reaches a terminal state, an optional hook can run to
//! process the results (file the recording, kick off an external
//! pipeline, etc.).

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::session::SessionSummary;

/// Environment variable names for session metadata passed to hooks.
pub mod hook_env {
    pub const SESSION_ID: &str = "CONFAB_SESSION_ID";
    pub const SESSION_NAME: &str = "CONFAB_SESSION_NAME";
    pub const SESSION_DIR: &str = "CONFAB_SESSION_DIR";
    pub const COMBINED_PATH: &str = "CONFAB_COMBINED_PATH";
    pub const DURATION_SECONDS: &str = "CONFAB_DURATION_SECONDS";
    pub const PHASE: &str = "CONFAB_PHASE";
}

/// Post-session processing hook.
#[async_trait]
pub trait PostSessionHook: Send + Sync {
    async fn execute(&self, summary: &SessionSummary) -> Result<()>;
}

/// Executes a shell command with session metadata.
/// - Pipes the summary JSON to stdin
/// - Sets environment variables for session metadata
/// - Kills the process on timeout
/// - A non-zero exit code logs a warning but does not fail
pub struct ShellCommandHook {
    command: String,
    timeout: Duration,
}

impl ShellCommandHook {
    pub fn new(command: String, timeout_seconds: u64) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

#[async_trait]
impl PostSessionHook for ShellCommandHook {
    async fn execute(&self, summary: &SessionSummary) -> Result<()> {
        info!(
            "Running post-session hook for {}: {}",
            summary.session_id, self.command
        );

        let combined_path = match &summary.combined {
            crate::session::CombinedOutcome::Complete(path)
            | crate::session::CombinedOutcome::Incomplete(path) => {
                path.to_string_lossy().into_owned()
            }
            crate::session::CombinedOutcome::Skipped => String::new(),
        };

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(hook_env::SESSION_ID, &summary.session_id)
            .env(
                hook_env::SESSION_NAME,
                summary.name.clone().unwrap_or_default(),
            )
            .env(
                hook_env::SESSION_DIR,
                summary.base_dir.join(&summary.session_id),
            )
            .env(hook_env::COMBINED_PATH, combined_path)
            .env(
                hook_env::DURATION_SECONDS,
                format!("{:.3}", summary.duration_seconds),
            )
            .env(hook_env::PHASE, summary.phase.as_str())
            .stdin(std::process::Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let json = serde_json::to_vec(summary)?;
            if let Err(e) = stdin.write_all(&json).await {
                warn!("Failed to write summary to hook stdin: {}", e);
            }
        }

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    warn!(
                        "Post-session hook exited with {} for {}",
                        status, summary.session_id
                    );
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!("Post-session hook timed out; killing it");
                let _ = child.kill().await;
                anyhow::bail!("hook timed out after {:?}", self.timeout)
            }
        }
    }
}
