//! Shared player state and the transport control plane.
//!
//! The player is shared between the output producer thread and every control
//! surface behind one lock. Changes are broadcast as [`PlayerEvent`]s.

pub mod control;
pub mod player_state;

pub use {
    control::{Command, ControlError, ControlQueue, ControlRequest, Transport, parse_command},
    player_state::{
        NowPlaying, OutputLink, PlaybackStatus, Player, PlayerEvent, SharedPlayer, track_id,
    },
};
