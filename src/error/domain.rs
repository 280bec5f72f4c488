//! Domain error aggregate using `thiserror`.
//!
//! Each subsystem defines its own error enum next to its code. `PlayerError`
//! collects them for the binary and for callers that drive several
//! subsystems at once.

use std::result::Result as StdResult;

use thiserror::Error;

use crate::{
    audio::{demux::DemuxError, engine::EngineError, output::OutputError, track::TrackError},
    config::SettingsError,
    state::ControlError,
};

/// Any error raised by the player.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// A file could not be classified or split into tracks.
    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),
    /// A track operation failed.
    #[error("Track error: {0}")]
    Track(#[from] TrackError),
    /// A buffer fill failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    /// The output device failed.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
    /// A control operation was rejected.
    #[error("Control error: {0}")]
    Control(#[from] ControlError),
    /// Preferences could not be loaded or saved.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
    /// None of the given files holds a playable stream.
    #[error("No playable files")]
    NoPlayableFiles,
}

impl PlayerError {
    /// Whether playback cannot continue after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::Engine(_) | PlayerError::Output(_) | PlayerError::NoPlayableFiles
        )
    }
}

/// Result type of operations spanning several subsystems.
pub type Result<T> = StdResult<T, PlayerError>;
