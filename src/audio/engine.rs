//! Playback engine filling output buffers from the playlist.
//!
//! The engine keeps one continuous output stream and pulls canonical frames
//! from the current track. When a track runs short the playlist decides what
//! comes next and the fill continues in the same buffer, so consecutive
//! tracks join without a gap.

use {thiserror::Error, tracing::debug};

use crate::audio::{
    playlist::{Advance, Playlist},
    track::{GainReference, GainWhence, OUTPUT_CHANNELS, TrackError},
};

/// Error type for buffer fills.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The current track failed to decode. Playback cannot continue.
    #[error("Track {index} failed: {source}")]
    DecodeFailed {
        index: usize,
        #[source]
        source: TrackError,
    },
    /// The output buffer cannot hold the requested frames.
    #[error("Buffer of {len} samples cannot hold {frames} frames")]
    BufferTooSmall { len: usize, frames: usize },
}

/// Outcome of a buffer fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Every requested frame holds audio.
    Filled,
    /// The playlist ran out. Frames past `frames_written` are silence.
    Exhausted { frames_written: usize },
}

/// Engine-scope gain, applied to whichever track is current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineGain {
    /// Manual gain in dB.
    pub gain_db: f32,
    /// Loudness correction to add.
    pub reference: GainReference,
}

impl Default for EngineGain {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            reference: GainReference::Header,
        }
    }
}

/// Fills `out` with `frames` canonical frames from the playlist.
///
/// Before each decode the engine gain is pushed to the current track. A short
/// decode hands control to the playlist's end-of-track rule and the fill
/// resumes on the track it selects.
///
/// # Arguments
///
/// * `playlist` - Tracks to play.
/// * `gain` - Engine-scope gain.
/// * `out` - Interleaved destination of at least `frames * OUTPUT_CHANNELS` samples.
/// * `frames` - Frames to produce.
///
/// # Returns
///
/// `FillOutcome::Exhausted` with the remainder zero-filled once the playlist
/// has nothing left to play.
///
/// # Errors
///
/// Returns `EngineError::DecodeFailed` when the current track cannot be
/// decoded. The content of `out` is unspecified in that case and must not
/// be played.
pub fn fill(
    playlist: &mut Playlist,
    gain: EngineGain,
    out: &mut [f32],
    frames: usize,
) -> Result<FillOutcome, EngineError> {
    let needed = frames * OUTPUT_CHANNELS;
    if out.len() < needed {
        return Err(EngineError::BufferTooSmall {
            len: out.len(),
            frames,
        });
    }

    let mut written = 0;
    // Tracks that ended without producing a frame since the last progress.
    let mut idle_tracks = 0;

    while written < frames {
        let index = playlist.index();
        let Some(track) = playlist.current_mut() else {
            out[written * OUTPUT_CHANNELS..needed].fill(0.0);
            return Ok(FillOutcome::Exhausted {
                frames_written: written,
            });
        };

        track.set_gain(gain.gain_db, GainWhence::Set);
        track.set_gain_reference(gain.reference);

        let wanted = frames - written;
        let decoded = track
            .decode(&mut out[written * OUTPUT_CHANNELS..needed], wanted)
            .map_err(|source| EngineError::DecodeFailed { index, source })?;
        written += decoded;

        if decoded == wanted {
            break;
        }

        idle_tracks = if decoded == 0 { idle_tracks + 1 } else { 0 };
        let stalled = idle_tracks > playlist.len();

        if stalled || playlist.on_end_of_track() == Advance::Exhausted {
            debug!(written, stalled, "Playlist exhausted");
            out[written * OUTPUT_CHANNELS..needed].fill(0.0);
            return Ok(FillOutcome::Exhausted {
                frames_written: written,
            });
        }
    }

    Ok(FillOutcome::Filled)
}
