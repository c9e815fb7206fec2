use anyhow::{anyhow, Result};
use std::path::PathBuf;

const APP_DIR: &str = "confab";

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_DIR));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".local").join("share").join(APP_DIR));
    }
    Err(anyhow!("Unable to determine data directory"))
}

pub fn recordings_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("recordings"))
}

pub fn db_file() -> Result<PathBuf> {
    Ok(data_dir()?.join("confab.db"))
}
