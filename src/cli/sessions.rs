//! The `sessions` command: inspect finished sessions from the store.

use anyhow::{bail, Result};

use crate::cli::args::{SessionsArgs, SessionsCommand};
use crate::config::Settings;
use crate::storage::SessionStore;

pub fn handle_sessions_command(args: SessionsArgs, settings: Settings) -> Result<()> {
    let store = SessionStore::open(&settings.database_path)?;
    match args.command {
        SessionsCommand::List { limit } => list_sessions(&store, limit),
        SessionsCommand::Show { id } => show_session(&store, &id),
    }
}

fn list_sessions(store: &SessionStore, limit: usize) -> Result<()> {
    let rows = store.list(limit)?;
    if rows.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!(
        "{:<20} | {:<19} | {:<9} | {:>8} | Name",
        "ID", "Created", "Phase", "Duration"
    );
    for row in rows {
        let mut phase = row.phase.as_str().to_string();
        if row.degraded {
            phase.push('*');
        }
        println!(
            "{:<20} | {:<19} | {:<9} | {:>7.1}s | {}",
            row.id,
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            phase,
            row.duration_seconds,
            row.name.unwrap_or_default(),
        );
    }
    println!();
    println!("* = degraded (a channel failed mid-session)");
    Ok(())
}

fn show_session(store: &SessionStore, id: &str) -> Result<()> {
    let Some(summary) = store.fetch(id)? else {
        bail!("No session with id '{id}'");
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
