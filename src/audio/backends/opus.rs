//! Opus backend.
//!
//! Opus streams carry an output gain in their identification header and
//! express loudness tags relative to it (`R128_*_GAIN`, Q7.8 dB). Unlike the
//! other backends, the combined gain lives in the decoder stage and is only
//! recomputed when the gain or gain reference changes.

use std::path::Path;

use tracing::debug;

use crate::audio::{
    backends::{average_bitrate, decode_link, duration_seconds, seek_link},
    decoder::{ContainerKind, LinkDecoder},
    link_source::LinkRange,
    metadata::{TagList, parse_r128},
    track::{
        Codec, GainReference, GainWhence, Loudness, OUTPUT_SAMPLE_RATE, Track, TrackError,
        TrackMeta, TrackState, Whence, gain_scale,
    },
};

/// Fields of the `OpusHead` identification packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    /// Channel count.
    pub channels: u8,
    /// Samples to discard at the start, at 48 kHz.
    pub pre_skip: u16,
    /// Sample rate of the original input, informational only.
    pub input_sample_rate: u32,
    /// Output gain, Q7.8 dB.
    pub output_gain: i16,
}

impl OpusHead {
    /// Parses an identification packet.
    ///
    /// # Returns
    ///
    /// The parsed header, or `None` if the packet is not an `OpusHead`.
    #[must_use]
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < 19 || &packet[..8] != b"OpusHead" {
            return None;
        }
        Some(Self {
            channels: packet[9],
            pre_skip: u16::from_le_bytes([packet[10], packet[11]]),
            input_sample_rate: u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
            output_gain: i16::from_le_bytes([packet[16], packet[17]]),
        })
    }

    /// Output gain in dB.
    #[must_use]
    pub fn output_gain_db(&self) -> f32 {
        f32::from(self.output_gain) / 256.0
    }
}

/// Loudness corrections of an Opus stream.
///
/// Album and track corrections are relative to the header gain.
#[must_use]
pub fn opus_loudness(head: Option<&OpusHead>, tags: &TagList) -> Loudness {
    let header_db = head.map_or(0.0, OpusHead::output_gain_db);
    Loudness {
        header_db,
        album_db: tags
            .first("R128_ALBUM_GAIN")
            .and_then(parse_r128)
            .map(|db| header_db + db),
        track_db: tags
            .first("R128_TRACK_GAIN")
            .and_then(parse_r128)
            .map(|db| header_db + db),
    }
}

/// An Opus link of an Ogg file.
pub struct OpusTrack {
    meta: TrackMeta,
    state: TrackState,
    loudness: Loudness,
    /// Gain currently configured in the decoder stage, in dB.
    decoder_gain_db: f32,
    stream: Option<LinkDecoder>,
}

impl OpusTrack {
    /// Opens an Opus link.
    ///
    /// # Errors
    ///
    /// Returns `TrackError` if the link cannot be opened or decoded.
    pub fn open(path: &Path, range: LinkRange) -> Result<Self, TrackError> {
        let opened = LinkDecoder::open(path, range, ContainerKind::Ogg, Codec::Opus)?;
        let params = &opened.params;
        let head = params.extra_data.as_deref().and_then(OpusHead::parse);
        let duration = duration_seconds(params, None);
        let tags = opened.tags.standard();

        let sample_rate = head
            .map(|h| h.input_sample_rate)
            .filter(|&rate| rate > 0)
            .unwrap_or(OUTPUT_SAMPLE_RATE);

        let meta = TrackMeta {
            codec: Codec::Opus,
            channels: params.channels.map_or(0, |c| c.count()),
            bit_depth: None,
            sample_rate,
            duration,
            bitrate: average_bitrate(opened.byte_len, duration),
            artist: tags.artist,
            album: tags.album,
            title: tags.title,
            track_number: tags.track_number,
            track_total: tags.track_total,
        };

        let loudness = opus_loudness(head.as_ref(), &opened.tags);
        debug!(?head, ?loudness, "Opened Opus track");

        let state = TrackState::default();
        Ok(Self {
            meta,
            state,
            loudness,
            decoder_gain_db: loudness.total_db(&state),
            stream: Some(opened.decoder),
        })
    }

    /// Pushes the combined gain into the decoder stage.
    fn configure_decoder_gain(&mut self) {
        self.decoder_gain_db = self.loudness.total_db(&self.state);
    }
}

impl Track for OpusTrack {
    fn state(&self) -> TrackState {
        self.state
    }

    fn metadata(&self) -> &TrackMeta {
        &self.meta
    }

    fn decode(&mut self, out: &mut [f32], frames: usize) -> Result<usize, TrackError> {
        decode_link(
            self.stream.as_mut(),
            &mut self.state,
            self.meta.duration,
            out,
            frames,
            gain_scale(self.decoder_gain_db),
        )
    }

    fn seek(&mut self, offset: f64, whence: Whence) -> Result<(), TrackError> {
        seek_link(
            self.stream.as_mut(),
            &mut self.state,
            self.meta.duration,
            offset,
            whence,
        )
    }

    fn set_gain(&mut self, value: f32, whence: GainWhence) {
        self.state.apply_gain(value, whence);
        self.configure_decoder_gain();
    }

    fn set_gain_reference(&mut self, reference: GainReference) {
        self.state.gain_reference = reference;
        self.configure_decoder_gain();
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
