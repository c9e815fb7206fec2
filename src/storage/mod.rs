//! Finished-session persistence.
//!
//! Raw SQL with rusqlite, no ORM. The core emits a `SessionSummary`
//! when a session reaches a terminal state; this store persists it and
//! serves the CLI's history commands. It never reaches back into the
//! recording pipeline.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::session::summary::{CombinedOutcome, SessionSummary};
use crate::session::SessionPhase;

/// One row of the session listing.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub duration_seconds: f64,
    pub degraded: bool,
}

pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (and initialize) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {parent:?}"))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {path:?}"))?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory().context("Failed to open in-memory database")?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    created_at TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    sample_rate INTEGER NOT NULL,
                    duration_seconds REAL NOT NULL,
                    base_dir TEXT NOT NULL,
                    channels TEXT NOT NULL,
                    combined TEXT NOT NULL,
                    degraded INTEGER NOT NULL,
                    warnings TEXT NOT NULL
                )",
                [],
            )
            .context("Failed to create sessions table")?;
        Ok(())
    }

    /// Persist a terminal summary. Re-saving the same session replaces
    /// the row, so persisting an idempotent `stop` twice is harmless.
    pub fn save_summary(&self, summary: &SessionSummary) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions (
                    id, name, created_at, phase, sample_rate, duration_seconds,
                    base_dir, channels, combined, degraded, warnings
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    summary.session_id,
                    summary.name,
                    summary.created_at.to_rfc3339(),
                    summary.phase.as_str(),
                    summary.sample_rate,
                    summary.duration_seconds,
                    summary.base_dir.to_string_lossy().into_owned(),
                    serde_json::to_string(&summary.channels)?,
                    serde_json::to_string(&summary.combined)?,
                    summary.degraded as i64,
                    serde_json::to_string(&summary.warnings)?,
                ],
            )
            .context("Failed to save session summary")?;
        Ok(())
    }

    pub fn fetch(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at, phase, sample_rate, duration_seconds,
                        base_dir, channels, combined, degraded, warnings
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()
            .context("Failed to fetch session")?;

        let Some((id, name, created_at, phase, sample_rate, duration, base_dir, channels, combined, degraded, warnings)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(SessionSummary {
            session_id: id,
            name,
            created_at: parse_timestamp(&created_at)?,
            phase: parse_phase(&phase),
            sample_rate,
            duration_seconds: duration,
            base_dir: PathBuf::from(base_dir),
            channels: serde_json::from_str(&channels).context("Corrupt channels column")?,
            combined: serde_json::from_str::<CombinedOutcome>(&combined)
                .context("Corrupt combined column")?,
            degraded: degraded != 0,
            warnings: serde_json::from_str(&warnings).context("Corrupt warnings column")?,
        }))
    }

    /// Most recent sessions first.
    pub fn list(&self, limit: usize) -> Result<Vec<SessionRow>> {
        let mut statement = self.conn.prepare(
            "SELECT id, name, created_at, phase, duration_seconds, degraded
             FROM sessions ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = statement
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .context("Failed to list sessions")?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, name, created_at, phase, duration_seconds, degraded) = row?;
            sessions.push(SessionRow {
                id,
                name,
                created_at: parse_timestamp(&created_at)?,
                phase: parse_phase(&phase),
                duration_seconds,
                degraded: degraded != 0,
            });
        }
        Ok(sessions)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Corrupt timestamp: {value}"))?
        .with_timezone(&Utc))
}

fn parse_phase(value: &str) -> SessionPhase {
    match value {
        "recording" => SessionPhase::Recording,
        "paused" => SessionPhase::Paused,
        "failed" => SessionPhase::Failed,
        _ => SessionPhase::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{BackendKind, StreamFormat};
    use crate::session::summary::ChannelSummary;
    use crate::session::ChannelRole;

    fn summary(id: &str) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            name: Some("weekly sync".to_string()),
            created_at: Utc::now(),
            phase: SessionPhase::Stopped,
            sample_rate: 16_000,
            duration_seconds: 12.5,
            base_dir: PathBuf::from("/tmp/recordings"),
            channels: vec![ChannelSummary {
                role: ChannelRole::Mic,
                backend: BackendKind::Cpal,
                format: StreamFormat {
                    sample_rate: 48_000,
                    channels: 1,
                },
                directory: PathBuf::from("/tmp/recordings/x/raw/mic"),
                chunks_sealed: 13,
                frames_captured: 600_000,
                duration_seconds: 12.5,
                failed: false,
                error: None,
            }],
            combined: CombinedOutcome::Complete(PathBuf::from(
                "/tmp/recordings/x/processed/combined.wav",
            )),
            degraded: false,
            warnings: vec![],
        }
    }

    #[test]
    fn save_and_fetch_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let original = summary("session-0001");
        store.save_summary(&original).unwrap();

        let fetched = store.fetch("session-0001").unwrap().unwrap();
        // Timestamps survive at second precision through RFC 3339.
        assert_eq!(fetched.session_id, original.session_id);
        assert_eq!(fetched.channels, original.channels);
        assert_eq!(fetched.combined, original.combined);
        assert_eq!(fetched.phase, original.phase);
        assert!(!fetched.degraded);
    }

    #[test]
    fn fetch_missing_returns_none() {
        let store = SessionStore::open_in_memory().unwrap();
        assert!(store.fetch("nope").unwrap().is_none());
    }

    #[test]
    fn resave_replaces_row() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut s = summary("session-0002");
        store.save_summary(&s).unwrap();
        s.degraded = true;
        store.save_summary(&s).unwrap();

        assert_eq!(store.list(10).unwrap().len(), 1);
        assert!(store.fetch("session-0002").unwrap().unwrap().degraded);
    }

    #[test]
    fn list_is_recent_first_and_limited() {
        let store = SessionStore::open_in_memory().unwrap();
        for i in 0..5 {
            let mut s = summary(&format!("session-{i:04}"));
            s.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.save_summary(&s).unwrap();
        }
        let rows = store.list(3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "session-0004");
    }
}
