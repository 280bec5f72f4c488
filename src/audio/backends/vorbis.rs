//! Vorbis backend.

use std::path::Path;

use tracing::debug;

use crate::audio::{
    backends::{average_bitrate, decode_link, duration_seconds, replaygain_loudness, seek_link},
    decoder::{ContainerKind, LinkDecoder},
    link_source::LinkRange,
    track::{
        Codec, GainReference, GainWhence, Loudness, Track, TrackError, TrackMeta, TrackState,
        Whence, gain_scale,
    },
};

/// A Vorbis link of an Ogg file.
pub struct VorbisTrack {
    meta: TrackMeta,
    state: TrackState,
    loudness: Loudness,
    stream: Option<LinkDecoder>,
}

impl VorbisTrack {
    /// Opens a Vorbis link.
    ///
    /// # Errors
    ///
    /// Returns `TrackError` if the link cannot be opened or decoded.
    pub fn open(path: &Path, range: LinkRange) -> Result<Self, TrackError> {
        let opened = LinkDecoder::open(path, range, ContainerKind::Ogg, Codec::Vorbis)?;
        let params = &opened.params;
        let duration = duration_seconds(params, None);
        let tags = opened.tags.standard();

        let meta = TrackMeta {
            codec: Codec::Vorbis,
            channels: params.channels.map_or(0, |c| c.count()),
            bit_depth: None,
            sample_rate: params.sample_rate.unwrap_or(0),
            duration,
            bitrate: average_bitrate(opened.byte_len, duration),
            artist: tags.artist,
            album: tags.album,
            title: tags.title,
            track_number: tags.track_number,
            track_total: tags.track_total,
        };

        let loudness = replaygain_loudness(&opened.tags);
        debug!(?loudness, "Opened Vorbis track");

        Ok(Self {
            meta,
            state: TrackState::default(),
            loudness,
            stream: Some(opened.decoder),
        })
    }
}

impl Track for VorbisTrack {
    fn state(&self) -> TrackState {
        self.state
    }

    fn metadata(&self) -> &TrackMeta {
        &self.meta
    }

    fn decode(&mut self, out: &mut [f32], frames: usize) -> Result<usize, TrackError> {
        let scale = gain_scale(self.loudness.total_db(&self.state));
        decode_link(
            self.stream.as_mut(),
            &mut self.state,
            self.meta.duration,
            out,
            frames,
            scale,
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
    }

    fn set_gain_reference(&mut self, reference: GainReference) {
        self.state.gain_reference = reference;
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
