//! The typed error surface of the recorder core.
//!
//! A single `thiserror` enum (`RecorderError`) plus a `Result` alias. The
//! core uses these typed errors; the CLI layer maps them onto `anyhow`.

use thiserror::Error;

/// Errors produced by the recorder core.
#[derive(Debug, Clone, Error)]
pub enum RecorderError {
    /// The requested audio backend could not be initialised or no suitable
    /// device was available.
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A device specification string could not be parsed or did not resolve
    /// to a usable device/configuration.
    #[error("invalid device spec: {0}")]
    InvalidDeviceSpec(String),

    /// The requested device is already in use and cannot be opened.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// A device that was in use disconnected or stopped delivering audio.
    #[error("device disconnected: {0}")]
    DeviceDisconnected(String),

    /// Durable chunk storage could not be written or committed.
    #[error("storage write failure: {0}")]
    StorageWriteFailure(String),

    /// A session state machine transition was requested that is not legal
    /// from the current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl RecorderError {
    /// Construct a [`RecorderError::StorageWriteFailure`] from anything that
    /// converts into a `String`.
    pub fn storage(message: impl Into<String>) -> Self {
        RecorderError::StorageWriteFailure(message.into())
    }
}

/// Result alias over [`RecorderError`].
pub type Result<T> = std::result::Result<T, RecorderError>;
