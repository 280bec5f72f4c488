//! Fixtures shared by the audio tests.
//!
//! [`ToneTrack`] is an in-memory track producing a constant signal. The
//! writers build small but valid FLAC streams (verbatim subframes) in native
//! and Ogg framing so the demuxer and the backends can be exercised on real
//! files. Opus and Vorbis fixtures are encoded from a sine with libopus and
//! libvorbis.

use std::{f64::consts::TAU, fs::write, path::Path};

use {
    audiopus::{Application, Bitrate, Channels, SampleRate, coder::Encoder as OpusEncoder},
    ogg::writing::{PacketWriteEndInfo, PacketWriter},
    vorbis_encoder::Encoder as VorbisEncoder,
};

use crate::audio::track::{
    Codec, GainReference, GainWhence, Loudness, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, Track,
    TrackError, TrackMeta, TrackState, Whence, gain_scale, seek_target,
};

/// Samples per FLAC block written by the fixtures.
pub const FIXTURE_BLOCK: usize = 1024;

/// Synthetic track holding `frames` frames of a constant stereo signal.
pub struct ToneTrack {
    meta: TrackMeta,
    state: TrackState,
    loudness: Loudness,
    total_frames: usize,
    cursor: usize,
    amplitude: f32,
    fail_at: Option<usize>,
    closed: bool,
}

impl ToneTrack {
    pub fn new(frames: usize, amplitude: f32) -> Self {
        Self {
            meta: TrackMeta {
                codec: Codec::Flac,
                channels: 2,
                bit_depth: Some(16),
                sample_rate: OUTPUT_SAMPLE_RATE,
                duration: frames as f64 / f64::from(OUTPUT_SAMPLE_RATE),
                bitrate: 0,
                artist: None,
                album: None,
                title: None,
                track_number: None,
                track_total: None,
            },
            state: TrackState::default(),
            loudness: Loudness::default(),
            total_frames: frames,
            cursor: 0,
            amplitude,
            fail_at: None,
            closed: false,
        }
    }

    /// Declares an album correction.
    pub fn with_album_gain(mut self, db: f32) -> Self {
        self.loudness.album_db = Some(db);
        self
    }

    /// Fails every decode that would read past `frame`.
    pub fn failing_at(mut self, frame: usize) -> Self {
        self.fail_at = Some(frame);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.meta.title = Some(title.to_string());
        self
    }
}

impl Track for ToneTrack {
    fn state(&self) -> TrackState {
        self.state
    }

    fn metadata(&self) -> &TrackMeta {
        &self.meta
    }

    fn decode(&mut self, out: &mut [f32], frames: usize) -> Result<usize, TrackError> {
        if self.closed {
            return Err(TrackError::Closed);
        }
        if self.fail_at.is_some_and(|at| self.cursor + frames > at) {
            return Err(TrackError::Corrupt {
                attempts: 8,
                reason: "synthetic failure".to_string(),
            });
        }

        let count = frames.min(self.total_frames - self.cursor);
        let value = self.amplitude * gain_scale(self.loudness.total_db(&self.state));

        for frame in out.chunks_exact_mut(OUTPUT_CHANNELS).take(count) {
            frame.fill(0.0);
            frame[0] = value;
            frame[2] = value;
        }
        self.cursor += count;
        self.state.advance(count, self.meta.duration);
        if count < frames {
            self.state.position = self.meta.duration;
        }
        Ok(count)
    }

    fn seek(&mut self, offset: f64, whence: Whence) -> Result<(), TrackError> {
        if self.closed {
            return Err(TrackError::Closed);
        }
        let target = seek_target(self.state.position, self.meta.duration, offset, whence);
        self.cursor = ((target * f64::from(OUTPUT_SAMPLE_RATE)).round() as usize)
            .min(self.total_frames);
        self.state.position = target;
        Ok(())
    }

    fn set_gain(&mut self, value: f32, whence: GainWhence) {
        self.state.apply_gain(value, whence);
    }

    fn set_gain_reference(&mut self, reference: GainReference) {
        self.state.gain_reference = reference;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Description of a FLAC fixture stream.
#[derive(Debug, Clone)]
pub struct FlacFixture {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per channel, a multiple of [`FIXTURE_BLOCK`].
    pub frames: usize,
    /// Constant 16-bit value written to every sample.
    pub value: i16,
    pub tags: Vec<(String, String)>,
}

impl FlacFixture {
    pub fn new(sample_rate: u32, channels: usize, blocks: usize, value: i16) -> Self {
        Self {
            sample_rate,
            channels,
            frames: blocks * FIXTURE_BLOCK,
            value,
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// STREAMINFO block body.
    pub fn streaminfo(&self) -> Vec<u8> {
        let mut block = Vec::with_capacity(34);
        block.extend_from_slice(&(FIXTURE_BLOCK as u16).to_be_bytes());
        block.extend_from_slice(&(FIXTURE_BLOCK as u16).to_be_bytes());
        block.extend_from_slice(&[0; 6]);
        let packed = (u64::from(self.sample_rate) << 44)
            | ((self.channels as u64 - 1) << 41)
            | (15u64 << 36)
            | self.frames as u64;
        block.extend_from_slice(&packed.to_be_bytes());
        block.extend_from_slice(&[0; 16]);
        block
    }

    /// VORBIS_COMMENT block body.
    pub fn vorbis_comment(&self) -> Vec<u8> {
        comment_body(b"fixture", &self.tags)
    }

    /// Encoded audio frames, one per block.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        (0..self.frames / FIXTURE_BLOCK)
            .map(|index| self.encode_frame(index))
            .collect()
    }

    fn encode_frame(&self, index: usize) -> Vec<u8> {
        let rate_code = match self.sample_rate {
            44_100 => 0x9,
            48_000 => 0xA,
            96_000 => 0xB,
            _ => 0x0,
        };

        // Fixed block size, block size from the 16-bit field, 16 bit samples.
        let mut frame = vec![
            0xFF,
            0xF8,
            0x70 | rate_code,
            (((self.channels - 1) as u8) << 4) | 0x08,
        ];
        frame.extend(utf8_number(index as u32));
        frame.extend_from_slice(&(FIXTURE_BLOCK as u16 - 1).to_be_bytes());
        frame.push(crc8(&frame));

        for _ in 0..self.channels {
            // Verbatim subframe without wasted bits.
            frame.push(0x02);
            for _ in 0..FIXTURE_BLOCK {
                frame.extend_from_slice(&self.value.to_be_bytes());
            }
        }

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    /// A native FLAC file.
    pub fn native_bytes(&self) -> Vec<u8> {
        let mut bytes = b"fLaC".to_vec();
        push_metadata_block(&mut bytes, 0, false, &self.streaminfo());
        push_metadata_block(&mut bytes, 4, true, &self.vorbis_comment());
        for frame in self.frames() {
            bytes.extend_from_slice(&frame);
        }
        bytes
    }

    /// One Ogg FLAC logical stream.
    pub fn ogg_bytes(&self, serial: u32) -> Vec<u8> {
        let mut head = vec![0x7F];
        head.extend_from_slice(b"FLAC");
        head.extend_from_slice(&[1, 0]);
        head.extend_from_slice(&1u16.to_be_bytes());
        head.extend_from_slice(b"fLaC");
        push_metadata_block(&mut head, 0, false, &self.streaminfo());

        let mut comment = Vec::new();
        push_metadata_block(&mut comment, 4, true, &self.vorbis_comment());

        let mut packets = vec![(head, 0)];
        packets.push((comment, 0));
        for (index, frame) in self.frames().into_iter().enumerate() {
            packets.push((frame, ((index + 1) * FIXTURE_BLOCK) as u64));
        }
        ogg_stream(serial, packets)
    }
}

/// Frames per Opus packet written by the fixtures (20 ms).
pub const OPUS_PACKET: usize = 960;

/// Pre-skip declared by the Opus fixtures.
pub const OPUS_PRE_SKIP: u16 = 312;

/// Interleaved 16-bit sine at 440 Hz, identical on every channel.
pub fn sine_pcm(sample_rate: u32, channels: usize, frames: usize, amplitude: f64) -> Vec<i16> {
    (0..frames)
        .flat_map(|n| {
            let phase = TAU * 440.0 * n as f64 / f64::from(sample_rate);
            let sample = (phase.sin() * amplitude * f64::from(i16::MAX)) as i16;
            std::iter::repeat_n(sample, channels)
        })
        .collect()
}

fn comment_body(vendor: &[u8], tags: &[(String, String)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    body.extend_from_slice(vendor);
    body.extend_from_slice(&(tags.len() as u32).to_le_bytes());
    for (key, value) in tags {
        let entry = format!("{key}={value}");
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend_from_slice(entry.as_bytes());
    }
    body
}

/// Description of an Ogg Opus fixture stream.
#[derive(Debug, Clone)]
pub struct OpusFixture {
    pub channels: usize,
    pub packets: usize,
    /// Header output gain, Q7.8 dB.
    pub output_gain: i16,
    pub tags: Vec<(String, String)>,
}

impl OpusFixture {
    pub fn new(channels: usize, packets: usize) -> Self {
        Self {
            channels,
            packets,
            output_gain: 0,
            tags: Vec::new(),
        }
    }

    pub fn output_gain(mut self, q7_8: i16) -> Self {
        self.output_gain = q7_8;
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// Playable frames once the pre-skip is dropped.
    pub fn playable_frames(&self) -> usize {
        self.packets * OPUS_PACKET - usize::from(OPUS_PRE_SKIP)
    }

    /// `OpusHead` identification packet.
    pub fn head(&self) -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.push(1);
        head.push(self.channels as u8);
        head.extend_from_slice(&OPUS_PRE_SKIP.to_le_bytes());
        head.extend_from_slice(&48_000u32.to_le_bytes());
        head.extend_from_slice(&self.output_gain.to_le_bytes());
        head.push(0);
        head
    }

    /// `OpusTags` comment packet.
    pub fn comment(&self) -> Vec<u8> {
        let mut packet = b"OpusTags".to_vec();
        packet.extend(comment_body(b"fixture", &self.tags));
        packet
    }

    /// Encodes the sine into Opus packets.
    pub fn encode(&self) -> Vec<Vec<u8>> {
        let channels = if self.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        };
        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, channels, Application::Audio).unwrap();
        encoder.set_bitrate(Bitrate::BitsPerSecond(96_000)).unwrap();

        let pcm = sine_pcm(48_000, self.channels, self.packets * OPUS_PACKET, 0.25);
        let mut packet = vec![0u8; 4000];
        pcm.chunks_exact(OPUS_PACKET * self.channels)
            .map(|frame| {
                let len = encoder.encode(frame, &mut packet).unwrap();
                packet[..len].to_vec()
            })
            .collect()
    }

    /// One Ogg Opus logical stream built from already encoded packets.
    pub fn ogg_bytes_from(&self, serial: u32, encoded: &[Vec<u8>]) -> Vec<u8> {
        let mut packets = vec![(self.head(), 0), (self.comment(), 0)];
        for (index, packet) in encoded.iter().enumerate() {
            packets.push((packet.clone(), ((index + 1) * OPUS_PACKET) as u64));
        }
        ogg_stream(serial, packets)
    }

    /// One Ogg Opus logical stream.
    pub fn ogg_bytes(&self, serial: u32) -> Vec<u8> {
        self.ogg_bytes_from(serial, &self.encode())
    }
}

/// Description of an Ogg Vorbis fixture stream.
#[derive(Debug, Clone)]
pub struct VorbisFixture {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
}

impl VorbisFixture {
    pub fn new(sample_rate: u32, channels: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frames,
        }
    }

    /// One Ogg Vorbis logical stream as written by libvorbis.
    pub fn ogg_bytes(&self) -> Vec<u8> {
        let mut encoder =
            VorbisEncoder::new(self.channels as u32, u64::from(self.sample_rate), 0.4)
                .unwrap_or_else(|e| panic!("vorbis encoder: {e}"));
        let pcm = sine_pcm(self.sample_rate, self.channels, self.frames, 0.25);
        let mut bytes = encoder
            .encode(&pcm)
            .unwrap_or_else(|e| panic!("vorbis encode: {e}"));
        bytes.extend(
            encoder
                .flush()
                .unwrap_or_else(|e| panic!("vorbis flush: {e}")),
        );
        bytes
    }
}

/// Builds one Ogg logical stream, one packet per page.
pub fn ogg_stream(serial: u32, packets: Vec<(Vec<u8>, u64)>) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = PacketWriter::new(&mut bytes);
        let last = packets.len().saturating_sub(1);
        for (index, (packet, granule)) in packets.into_iter().enumerate() {
            let info = if index == last {
                PacketWriteEndInfo::EndStream
            } else {
                PacketWriteEndInfo::EndPage
            };
            writer.write_packet(packet, serial, info, granule).unwrap();
        }
    }
    bytes
}

/// Writes the concatenation of several streams to `path`.
pub fn write_chained(path: &Path, links: &[Vec<u8>]) {
    write(path, links.concat()).unwrap();
}

fn push_metadata_block(out: &mut Vec<u8>, kind: u8, last: bool, body: &[u8]) {
    out.push(if last { 0x80 | kind } else { kind });
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
}

fn utf8_number(value: u32) -> Vec<u8> {
    if value < 0x80 {
        vec![value as u8]
    } else {
        vec![0xC0 | (value >> 6) as u8, 0x80 | (value & 0x3F) as u8]
    }
}

fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            }
        })
    })
}

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (0..8).fold(crc ^ (u16::from(byte) << 8), |crc, _| {
            if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use crate::audio::test_support::{FlacFixture, crc8, crc16, utf8_number};

    #[test]
    fn test_crc_check_values() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
    }

    #[test]
    fn test_frame_layout() {
        let fixture = FlacFixture::new(48_000, 2, 2, 100);
        let frames = fixture.frames();
        assert_eq!(frames.len(), 2);
        // Header, two verbatim subframes, footer.
        assert_eq!(frames[0].len(), 8 + 2 * (1 + 2 * 1024) + 2);
        assert_eq!(&frames[1][..5], &[0xFF, 0xF8, 0x7A, 0x18, 0x01]);
        assert_eq!(utf8_number(200), vec![0xC3, 0x88]);
    }
}
