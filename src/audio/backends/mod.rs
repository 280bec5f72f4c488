//! Codec backends.
//!
//! One [`Track`](crate::audio::track::Track) implementation per codec family.
//! All three decode through the shared [`LinkDecoder`]; what differs is where
//! loudness corrections come from, how gain is applied and a few metadata
//! details.

pub mod flac;
pub mod opus;
pub mod vorbis;

pub use {flac::FlacTrack, opus::OpusTrack, vorbis::VorbisTrack};

use {num_traits::cast::ToPrimitive, symphonia::core::codecs::CodecParameters};

use crate::audio::{
    decoder::LinkDecoder,
    metadata::{TagList, parse_replaygain},
    track::{Loudness, TrackError, TrackState, Whence, seek_target},
};

/// Duration of a link in seconds.
///
/// Uses the container's frame count and falls back to `fallback_frames`
/// (counted at the native rate) when the container does not know it.
pub(crate) fn duration_seconds(params: &CodecParameters, fallback_frames: Option<u64>) -> f64 {
    let rate = params.sample_rate.unwrap_or(0);
    if rate == 0 {
        return 0.0;
    }
    params
        .n_frames
        .or(fallback_frames)
        .map_or(0.0, |frames| frames as f64 / f64::from(rate))
}

/// Average bitrate of a link in bits per second.
pub(crate) fn average_bitrate(byte_len: u64, duration: f64) -> u32 {
    if duration <= 0.0 {
        return 0;
    }
    (byte_len as f64 * 8.0 / duration)
        .round()
        .to_u32()
        .unwrap_or(u32::MAX)
}

/// Loudness corrections from ReplayGain tags. The header gain is 0 dB.
pub(crate) fn replaygain_loudness(tags: &TagList) -> Loudness {
    Loudness {
        header_db: 0.0,
        album_db: tags
            .first("REPLAYGAIN_ALBUM_GAIN")
            .and_then(parse_replaygain),
        track_db: tags
            .first("REPLAYGAIN_TRACK_GAIN")
            .and_then(parse_replaygain),
    }
}

/// Decodes through an open link and advances the track position.
pub(crate) fn decode_link(
    stream: Option<&mut LinkDecoder>,
    state: &mut TrackState,
    duration: f64,
    out: &mut [f32],
    frames: usize,
    scale: f32,
) -> Result<usize, TrackError> {
    let stream = stream.ok_or(TrackError::Closed)?;
    let written = stream.read(out, frames, scale)?;

    state.advance(written, duration);
    if written < frames {
        state.position = duration.max(0.0);
    }

    Ok(written)
}

/// Seeks an open link and updates the track position.
pub(crate) fn seek_link(
    stream: Option<&mut LinkDecoder>,
    state: &mut TrackState,
    duration: f64,
    offset: f64,
    whence: Whence,
) -> Result<(), TrackError> {
    let stream = stream.ok_or(TrackError::Closed)?;
    let target = seek_target(state.position, duration, offset, whence);

    if target > 0.0 && target >= duration {
        stream.mark_finished();
    } else {
        stream.seek(target)?;
    }

    state.position = target;
    Ok(())
}
