//! Poppy - Gapless Command Line Audio Player
//!
//! Plays Opus, Vorbis and FLAC files, including chained Ogg streams, as one
//! continuous signal. Tracks are decoded into a fixed 48 kHz surround layout,
//! gain and loudness corrections are applied per track, and playback is
//! driven through a small transport control plane.

pub mod audio;
pub mod config;
pub mod error;
pub mod state;

// Re-export key types for convenience
pub use {
    audio::{
        demux::{DemuxError, open_tracks},
        engine::{EngineError, EngineGain, FillOutcome},
        output::{AudioOutput, OutputConfig, OutputError, PlaybackProducer},
        playlist::{LoopStatus, PlayMode, Playlist},
        track::{Codec, GainReference, Track, TrackError, TrackMeta},
    },
    config::{PlayerSettings, SettingsError, SettingsManager},
    error::{ErrorReporter, PlayerError, ResultExt},
    state::{ControlQueue, PlaybackStatus, PlayerEvent, SharedPlayer, Transport},
};
