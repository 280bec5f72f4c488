//! FLAC backend, for native FLAC files and FLAC links inside Ogg.

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

/// Size of a STREAMINFO metadata block body.
const STREAMINFO_LEN: usize = 34;

/// Fields of a STREAMINFO block the player needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u32,
    /// Total samples per channel, `None` when the encoder did not know.
    pub total_samples: Option<u64>,
}

impl StreamInfo {
    /// Parses a STREAMINFO block body.
    ///
    /// # Returns
    ///
    /// The parsed fields, or `None` if `block` is too short.
    #[must_use]
    pub fn parse(block: &[u8]) -> Option<Self> {
        if block.len() < STREAMINFO_LEN {
            return None;
        }

        let sample_rate =
            (u32::from(block[10]) << 12) | (u32::from(block[11]) << 4) | (u32::from(block[12]) >> 4);
        let channels = ((block[12] >> 1) & 0x07) + 1;
        let bits_per_sample = ((u32::from(block[12]) & 0x01) << 4 | u32::from(block[13]) >> 4) + 1;
        let total_samples = (u64::from(block[13] & 0x0F) << 32)
            | u64::from(u32::from_be_bytes([block[14], block[15], block[16], block[17]]));

        Some(Self {
            sample_rate,
            channels,
            bits_per_sample,
            total_samples: (total_samples > 0).then_some(total_samples),
        })
    }
}

/// A FLAC link.
pub struct FlacTrack {
    meta: TrackMeta,
    state: TrackState,
    loudness: Loudness,
    stream: Option<LinkDecoder>,
}

impl FlacTrack {
    /// Opens a FLAC link.
    ///
    /// # Arguments
    ///
    /// * `path` - The physical file.
    /// * `range` - Byte range of the link.
    /// * `container` - Native FLAC or Ogg.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `FlacTrack`.
    ///
    /// # Errors
    ///
    /// Returns `TrackError` if the link cannot be opened or decoded.
    pub fn open(path: &Path, range: LinkRange, container: ContainerKind) -> Result<Self, TrackError> {
        let opened = LinkDecoder::open(path, range, container, Codec::Flac)?;
        let params = &opened.params;

        let stream_info = params.extra_data.as_deref().and_then(StreamInfo::parse);
        let duration = duration_seconds(params, stream_info.and_then(|info| info.total_samples));
        let tags = opened.tags.standard();

        let meta = TrackMeta {
            codec: Codec::Flac,
            channels: params.channels.map_or(0, |c| c.count()),
            bit_depth: params
                .bits_per_sample
                .or(stream_info.map(|info| info.bits_per_sample)),
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
        debug!(?container, ?loudness, "Opened FLAC track");

        Ok(Self {
            meta,
            state: TrackState::default(),
            loudness,
            stream: Some(opened.decoder),
        })
    }
}

impl Track for FlacTrack {
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

#[cfg(test)]
mod tests {
    use crate::audio::backends::flac::StreamInfo;

    #[test]
    fn test_parse_streaminfo() {
        // 4096 block size, 44.1 kHz, 2 channels, 16 bit, 441000 samples.
        let mut block = [0u8; 34];
        block[0..2].copy_from_slice(&4096u16.to_be_bytes());
        block[2..4].copy_from_slice(&4096u16.to_be_bytes());
        let packed: u64 = (44_100u64 << 44) | (1u64 << 41) | (15u64 << 36) | 441_000;
        block[10..18].copy_from_slice(&packed.to_be_bytes());

        let info = StreamInfo::parse(&block).unwrap();
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, Some(441_000));
    }

    #[test]
    fn test_streaminfo_unknown_length() {
        let mut block = [0u8; 34];
        let packed: u64 = (48_000u64 << 44) | (7u64 << 36);
        block[10..18].copy_from_slice(&packed.to_be_bytes());

        let info = StreamInfo::parse(&block).unwrap();
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 8);
        assert_eq!(info.total_samples, None);
        assert!(StreamInfo::parse(&block[..20]).is_none());
    }
}
