//! Tests for the Opus and Vorbis backends on encoded streams.

#[cfg(test)]
mod tests {
    use std::{fs::write, path::Path};

    use tempfile::tempdir;

    use crate::audio::{
        demux::open_tracks,
        engine::{EngineGain, FillOutcome, fill},
        playlist::{PlayMode, Playlist},
        test_support::{OpusFixture, VorbisFixture, write_chained},
        track::{Codec, GainReference, GainWhence, OUTPUT_CHANNELS, Track, Whence},
    };

    /// Frames two encoded lengths may differ by (codec delay and padding).
    const LENGTH_SLACK: usize = 2048;

    /// Decodes a whole track and returns every canonical sample.
    fn decode_samples(track: &mut dyn Track) -> Vec<f32> {
        let mut samples = Vec::new();
        let mut out = vec![0.0; 1024 * OUTPUT_CHANNELS];
        loop {
            let written = track.decode(&mut out, 1024).unwrap();
            samples.extend_from_slice(&out[..written * OUTPUT_CHANNELS]);
            if written < 1024 {
                return samples;
            }
        }
    }

    fn level(samples: &[f32], slot: usize) -> f64 {
        samples
            .chunks_exact(OUTPUT_CHANNELS)
            .map(|frame| f64::from(frame[slot].abs()))
            .sum()
    }

    fn open_one(path: &Path, reference: GainReference) -> Box<dyn Track> {
        let mut track = open_tracks(path).unwrap().remove(0);
        track.set_gain(0.0, GainWhence::Set);
        track.set_gain_reference(reference);
        track
    }

    fn play_through(path: &Path) -> usize {
        let tracks = open_tracks(path).unwrap();
        let mut playlist = Playlist::new(tracks, PlayMode::Sequential);
        let mut out = vec![0.0; 1024 * OUTPUT_CHANNELS];
        let mut total = 0;
        loop {
            match fill(&mut playlist, EngineGain::default(), &mut out, 1024).unwrap() {
                FillOutcome::Filled => total += 1024,
                FillOutcome::Exhausted { frames_written } => return total + frames_written,
            }
        }
    }

    #[test]
    fn test_opus_track_opens_and_decodes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sine.opus");
        let fixture = OpusFixture::new(2, 50)
            .tag("TITLE", "Sine")
            .tag("ARTIST", "Fixture");
        write(&path, fixture.ogg_bytes(7)).unwrap();

        let mut tracks = open_tracks(&path).unwrap();
        assert_eq!(tracks.len(), 1);
        let track = tracks[0].as_mut();

        let meta = track.metadata().clone();
        assert_eq!(meta.codec, Codec::Opus);
        assert_eq!(meta.channels, 2);
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(meta.bit_depth, None);
        assert!(meta.bitrate > 0);
        assert_eq!(meta.title.as_deref(), Some("Sine"));
        assert_eq!(meta.artist.as_deref(), Some("Fixture"));
        let expected = fixture.playable_frames() as f64 / 48_000.0;
        assert!((meta.duration - expected).abs() < 0.03, "{}", meta.duration);

        let samples = decode_samples(track);
        let frames = samples.len() / OUTPUT_CHANNELS;
        assert!(
            frames.abs_diff(fixture.playable_frames()) <= LENGTH_SLACK,
            "{frames}"
        );
        assert!(level(&samples, 0) > 0.0);
        assert!(level(&samples, 2) > 0.0);
        assert!(
            samples
                .chunks_exact(OUTPUT_CHANNELS)
                .all(|frame| frame[1] == 0.0 && frame[3..].iter().all(|&s| s == 0.0))
        );
        assert_eq!(track.state().position, meta.duration);
    }

    #[test]
    fn test_opus_header_gain_scales_output() {
        let dir = tempdir().unwrap();
        let plain = OpusFixture::new(1, 25);
        let loud = plain.clone().output_gain(6 * 256);
        let encoded = plain.encode();

        let plain_path = dir.path().join("plain.opus");
        let loud_path = dir.path().join("loud.opus");
        write(&plain_path, plain.ogg_bytes_from(1, &encoded)).unwrap();
        write(&loud_path, loud.ogg_bytes_from(1, &encoded)).unwrap();

        let unity = level(
            &decode_samples(open_one(&plain_path, GainReference::Header).as_mut()),
            1,
        );
        let boosted = level(
            &decode_samples(open_one(&loud_path, GainReference::Header).as_mut()),
            1,
        );
        let ignored = level(
            &decode_samples(open_one(&loud_path, GainReference::Absolute).as_mut()),
            1,
        );

        assert!(unity > 0.0);
        assert!((boosted / unity - 10f64.powf(6.0 / 20.0)).abs() < 1e-3);
        assert!((ignored / unity - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_opus_r128_tags_are_relative_to_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r128.opus");
        let fixture = OpusFixture::new(1, 25)
            .output_gain(256)
            .tag("R128_TRACK_GAIN", "-1792");
        write(&path, fixture.ogg_bytes(3)).unwrap();

        let decode = |reference| level(&decode_samples(open_one(&path, reference).as_mut()), 1);
        let absolute = decode(GainReference::Absolute);
        let track = decode(GainReference::Track);
        let album = decode(GainReference::Album);

        assert!(absolute > 0.0);
        assert!((track / absolute - 10f64.powf(-6.0 / 20.0)).abs() < 1e-3);
        // No album tag: the header gain applies.
        assert!((album / absolute - 10f64.powf(1.0 / 20.0)).abs() < 1e-3);
    }

    #[test]
    fn test_opus_seek() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.opus");
        write(&path, OpusFixture::new(2, 50).ogg_bytes(5)).unwrap();

        let mut track = open_tracks(&path).unwrap().remove(0);
        let duration = track.metadata().duration;
        let mut out = vec![0.0; 256 * OUTPUT_CHANNELS];

        track.seek(0.5, Whence::Set).unwrap();
        assert_eq!(track.state().position, 0.5);
        assert_eq!(track.decode(&mut out, 256).unwrap(), 256);

        track.seek(10.0, Whence::Cur).unwrap();
        assert_eq!(track.state().position, duration);
        assert_eq!(track.decode(&mut out, 256).unwrap(), 0);

        track.seek(0.0, Whence::Set).unwrap();
        assert_eq!(track.decode(&mut out, 256).unwrap(), 256);
    }

    #[test]
    fn test_vorbis_track_opens_and_decodes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sine.ogg");
        let fixture = VorbisFixture::new(44_100, 2, 44_100);
        write(&path, fixture.ogg_bytes()).unwrap();

        let mut tracks = open_tracks(&path).unwrap();
        assert_eq!(tracks.len(), 1);
        let track = tracks[0].as_mut();

        let meta = track.metadata().clone();
        assert_eq!(meta.codec, Codec::Vorbis);
        assert_eq!(meta.channels, 2);
        assert_eq!(meta.sample_rate, 44_100);
        assert!(meta.bitrate > 0);
        assert!((meta.duration - 1.0).abs() < 0.05, "{}", meta.duration);

        let samples = decode_samples(track);
        let frames = samples.len() / OUTPUT_CHANNELS;
        assert!(frames.abs_diff(48_000) <= LENGTH_SLACK, "{frames}");
        assert!(level(&samples, 0) > 0.0);
        assert!(level(&samples, 2) > 0.0);
        assert_eq!(level(&samples, 1), 0.0);
    }

    #[test]
    fn test_vorbis_gain_scales_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gain.ogg");
        write(&path, VorbisFixture::new(48_000, 1, 24_000).ogg_bytes()).unwrap();

        let unity = level(
            &decode_samples(open_one(&path, GainReference::Header).as_mut()),
            1,
        );
        let mut quiet = open_one(&path, GainReference::Header);
        quiet.set_gain(-6.0, GainWhence::Set);
        let reduced = level(&decode_samples(quiet.as_mut()), 1);

        assert!(unity > 0.0);
        assert!((reduced / unity - 10f64.powf(-6.0 / 20.0)).abs() < 1e-3);
    }

    #[test]
    fn test_chained_opus_links_play_back_to_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chained.opus");
        let fixtures: Vec<OpusFixture> = [("one", 20), ("two", 30), ("three", 40)]
            .iter()
            .map(|&(title, packets)| OpusFixture::new(2, packets).tag("TITLE", title))
            .collect();
        let links: Vec<Vec<u8>> = fixtures
            .iter()
            .enumerate()
            .map(|(serial, fixture)| fixture.ogg_bytes(serial as u32 + 40))
            .collect();
        write_chained(&path, &links);

        let tracks = open_tracks(&path).unwrap();
        assert_eq!(tracks.len(), 3);
        for (track, title) in tracks.iter().zip(["one", "two", "three"]) {
            assert_eq!(track.metadata().codec, Codec::Opus);
            assert_eq!(track.metadata().title.as_deref(), Some(title));
        }
        assert!(tracks[2].metadata().duration > tracks[1].metadata().duration);

        let expected: usize = fixtures.iter().map(OpusFixture::playable_frames).sum();
        let total = play_through(&path);
        assert!(total.abs_diff(expected) <= 3 * LENGTH_SLACK, "{total} vs {expected}");
    }

    #[test]
    fn test_chained_vorbis_links_play_back_to_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chained.ogg");
        let lengths = [12_000, 24_000, 36_000];
        let links: Vec<Vec<u8>> = lengths
            .iter()
            .map(|&frames| VorbisFixture::new(48_000, 2, frames).ogg_bytes())
            .collect();
        write_chained(&path, &links);

        let tracks = open_tracks(&path).unwrap();
        assert_eq!(tracks.len(), 3);
        for (track, frames) in tracks.iter().zip(lengths) {
            assert_eq!(track.metadata().codec, Codec::Vorbis);
            assert!((track.metadata().duration - frames as f64 / 48_000.0).abs() < 0.05);
        }

        let expected: usize = lengths.iter().sum();
        let total = play_through(&path);
        assert!(total.abs_diff(expected) <= 3 * LENGTH_SLACK, "{total} vs {expected}");
    }
}
