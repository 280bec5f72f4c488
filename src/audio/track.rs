//! The uniform track surface shared by every codec backend.
//!
//! A [`Track`] is one logical audio stream (a whole file or one link of a
//! chained container). The rest of the player only talks to tracks through
//! this trait; the backend behind it is chosen once, when the container
//! demultiplexer classifies the stream.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use {
    serde::{Deserialize, Serialize},
    symphonia::core::errors::Error as SymphoniaError,
    thiserror::Error,
};

use crate::audio::{
    channel_layout::{CANONICAL_CHANNELS, SurroundProfile},
    resampler::ResamplingError,
};

/// Fixed output sample rate of the player.
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Fixed output channel count of the player.
pub const OUTPUT_CHANNELS: usize = CANONICAL_CHANNELS;

/// Lowest gain accepted anywhere in the player, in dB.
pub const MIN_GAIN_DB: f32 = -120.0;

/// Error type for track operations.
#[derive(Error, Debug)]
pub enum TrackError {
    /// Failed to open or read the backing file.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// Error reported by the decoder library.
    #[error("Decoder error: {0}")]
    DecoderError(#[from] SymphoniaError),
    /// Sample rate conversion failed.
    #[error("Resampling error: {0}")]
    ResamplingError(#[from] ResamplingError),
    /// The stream carries no decodable audio track.
    #[error("No audio track found")]
    NoAudioTrack,
    /// The stream uses a channel count the codec family cannot map.
    #[error("Unsupported channel count for {codec}: {channels}")]
    UnsupportedChannels { codec: Codec, channels: usize },
    /// Too many consecutive corrupt packets.
    #[error("Unrecoverable decode error after {attempts} attempts: {reason}")]
    Corrupt { attempts: usize, reason: String },
    /// The decoder could not locate the seek target.
    #[error("Seek to {target:.3}s failed: {reason}")]
    SeekFailed { target: f64, reason: String },
    /// The track was closed.
    #[error("Track is closed")]
    Closed,
}

/// Codec family of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Opus in Ogg.
    Opus,
    /// Vorbis in Ogg.
    Vorbis,
    /// FLAC, native or in Ogg.
    Flac,
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Codec::Opus => "Opus",
            Codec::Vorbis => "Vorbis",
            Codec::Flac => "FLAC",
        };
        write!(f, "{name}")
    }
}

/// Which tag-derived loudness correction is added to the manual gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainReference {
    /// Gain declared by the stream header.
    #[default]
    Header,
    /// Album loudness correction.
    Album,
    /// Track loudness correction.
    Track,
    /// No correction, the manual gain is used as is.
    Absolute,
}

impl FromStr for GainReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "header" => Ok(GainReference::Header),
            "album" => Ok(GainReference::Album),
            "track" => Ok(GainReference::Track),
            "absolute" | "none" => Ok(GainReference::Absolute),
            other => Err(format!("unknown gain reference: {other}")),
        }
    }
}

/// Origin of a seek offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the track.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the track.
    End,
}

/// How a gain value is combined with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainWhence {
    /// Replace the gain.
    Set,
    /// Add to the gain.
    Cur,
}

/// Immutable description of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMeta {
    /// Codec family.
    pub codec: Codec,
    /// Native channel count.
    pub channels: usize,
    /// Bits per sample, lossless codecs only.
    pub bit_depth: Option<u32>,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Duration in seconds.
    pub duration: f64,
    /// Average bitrate in bits per second.
    pub bitrate: u32,
    /// Artist tag.
    pub artist: Option<String>,
    /// Album tag.
    pub album: Option<String>,
    /// Title tag.
    pub title: Option<String>,
    /// Track number tag.
    pub track_number: Option<String>,
    /// Total tracks tag.
    pub track_total: Option<String>,
}

impl TrackMeta {
    /// Speaker profile of the native channel layout.
    #[must_use]
    pub fn profile(&self) -> Option<SurroundProfile> {
        SurroundProfile::for_channels(self.channels)
    }
}

impl Display for TrackMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let unknown = "unknown";
        write!(
            f,
            "{} - {} ({}) [{} {} Hz {}",
            self.artist.as_deref().unwrap_or(unknown),
            self.title.as_deref().unwrap_or(unknown),
            self.album.as_deref().unwrap_or(unknown),
            self.codec,
            self.sample_rate,
            self.profile().map_or("?", SurroundProfile::label),
        )?;
        if let Some(bits) = self.bit_depth {
            write!(f, " {bits} bit")?;
        }
        write!(f, " {} kbps {:.1}s]", self.bitrate / 1000, self.duration)
    }
}

/// Mutable playback state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Playback position in seconds, always within `[0, duration]`.
    pub position: f64,
    /// Manual gain offset in dB.
    pub gain_db: f32,
    /// Active gain reference.
    pub gain_reference: GainReference,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            position: 0.0,
            gain_db: 0.0,
            gain_reference: GainReference::Header,
        }
    }
}

impl TrackState {
    /// Applies a gain change.
    pub fn apply_gain(&mut self, value: f32, whence: GainWhence) {
        self.gain_db = match whence {
            GainWhence::Set => value,
            GainWhence::Cur => self.gain_db + value,
        };
    }

    /// Advances the position by a number of output frames, clamped to `duration`.
    pub fn advance(&mut self, frames: usize, duration: f64) {
        self.position = (self.position + frames as f64 / f64::from(OUTPUT_SAMPLE_RATE))
            .clamp(0.0, duration.max(0.0));
    }
}

/// Loudness corrections declared by a stream, in dB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Loudness {
    /// Gain declared by the stream header.
    pub header_db: f32,
    /// Album correction, already including the header gain.
    pub album_db: Option<f32>,
    /// Track correction, already including the header gain.
    pub track_db: Option<f32>,
}

impl Loudness {
    /// Correction selected by a gain reference.
    ///
    /// Missing album or track corrections fall back to the header gain.
    #[must_use]
    pub fn correction_db(&self, reference: GainReference) -> f32 {
        match reference {
            GainReference::Header => self.header_db,
            GainReference::Album => self.album_db.unwrap_or(self.header_db),
            GainReference::Track => self.track_db.unwrap_or(self.header_db),
            GainReference::Absolute => 0.0,
        }
    }

    /// Total gain for a track state: manual gain plus the selected correction.
    #[must_use]
    pub fn total_db(&self, state: &TrackState) -> f32 {
        state.gain_db + self.correction_db(state.gain_reference)
    }
}

/// Converts a gain in dB to a linear amplitude scale.
#[must_use]
pub fn gain_scale(db: f32) -> f32 {
    10f32.powf(db.max(MIN_GAIN_DB) / 20.0)
}

/// Computes the clamped target of a seek.
///
/// # Arguments
///
/// * `position` - Current position in seconds.
/// * `duration` - Track duration in seconds.
/// * `offset` - Seek offset in seconds.
/// * `whence` - Origin of the offset.
///
/// # Returns
///
/// The target position within `[0, duration]`.
#[must_use]
pub fn seek_target(position: f64, duration: f64, offset: f64, whence: Whence) -> f64 {
    let base = match whence {
        Whence::Set => 0.0,
        Whence::Cur => position,
        Whence::End => duration,
    };
    let target = base + offset;
    if target.is_nan() {
        return position;
    }
    target.clamp(0.0, duration.max(0.0))
}

/// One logical audio stream.
///
/// Implementations decode into the fixed output format: [`OUTPUT_SAMPLE_RATE`]
/// frames of [`OUTPUT_CHANNELS`] interleaved samples in canonical slot order.
pub trait Track: Send {
    /// Snapshot of the mutable playback state.
    fn state(&self) -> TrackState;

    /// Immutable track description.
    fn metadata(&self) -> &TrackMeta;

    /// Decodes up to `frames` canonical frames into `out`.
    ///
    /// # Arguments
    ///
    /// * `out` - Interleaved destination, at least `frames * OUTPUT_CHANNELS` long.
    /// * `frames` - Number of frames requested.
    ///
    /// # Returns
    ///
    /// The number of frames written. Fewer than requested means the track
    /// ended; zero means it was already at its end.
    ///
    /// # Errors
    ///
    /// Returns `TrackError` when decoding fails past the retry budget or the
    /// track was closed.
    fn decode(&mut self, out: &mut [f32], frames: usize) -> Result<usize, TrackError>;

    /// Moves the playback position.
    ///
    /// # Errors
    ///
    /// Returns `TrackError::SeekFailed` when the decoder cannot reach the
    /// target. The track stays decodable.
    fn seek(&mut self, offset: f64, whence: Whence) -> Result<(), TrackError>;

    /// Sets or accumulates the manual gain offset in dB.
    fn set_gain(&mut self, value: f32, whence: GainWhence);

    /// Selects which loudness correction is added to the manual gain.
    fn set_gain_reference(&mut self, reference: GainReference);

    /// Releases the decoder and the backing file.
    ///
    /// Calling it again is a no-op.
    fn close(&mut self);

    /// Whether the position has reached the end of the track.
    fn is_finished(&self) -> bool {
        self.state().position >= self.metadata().duration
    }
}
