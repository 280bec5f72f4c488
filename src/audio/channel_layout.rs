//! Speaker layout tables.
//!
//! Every decoded frame is written into one fixed 9-slot surround layout
//! (8.1 in Vorbis speaker order). Each codec family delivers its channels in
//! its own native order, so this module holds the per-codec, per-channel-count
//! tables that place a native channel into its canonical slot.

use serde::{Deserialize, Serialize};

use crate::audio::track::Codec;

/// Number of slots in the canonical output layout.
pub const CANONICAL_CHANNELS: usize = 9;

/// A speaker position in the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerPosition {
    /// Front left.
    FrontLeft,
    /// Front center.
    FrontCenter,
    /// Front right.
    FrontRight,
    /// Side left.
    SideLeft,
    /// Side right.
    SideRight,
    /// Rear left.
    RearLeft,
    /// Rear center.
    RearCenter,
    /// Rear right.
    RearRight,
    /// Low frequency effects.
    Lfe,
}

/// Canonical slot order. The index of a position in this array is its slot.
pub const CANONICAL_ORDER: [SpeakerPosition; CANONICAL_CHANNELS] = [
    SpeakerPosition::FrontLeft,
    SpeakerPosition::FrontCenter,
    SpeakerPosition::FrontRight,
    SpeakerPosition::SideLeft,
    SpeakerPosition::SideRight,
    SpeakerPosition::RearLeft,
    SpeakerPosition::RearCenter,
    SpeakerPosition::RearRight,
    SpeakerPosition::Lfe,
];

/// Named surround profiles, one per supported channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurroundProfile {
    /// No channels.
    Silence,
    /// Single center channel.
    Mono,
    /// Left and right.
    Stereo,
    /// Left, center, right.
    LinearSurround,
    /// Front pair and rear pair.
    Quadraphonic,
    /// 5.0 surround.
    FivePointZero,
    /// 5.1 surround.
    FivePointOne,
    /// 6.1 surround.
    SixPointOne,
    /// 7.1 surround.
    SevenPointOne,
    /// 8.1 surround, the full canonical layout.
    EightPointOne,
}

/// Vorbis channel order to canonical slot, indexed by channel count.
///
/// Opus mapping families 0 and 1 share the Vorbis order.
static VORBIS_TO_CANONICAL: [&[usize]; CANONICAL_CHANNELS + 1] = [
    &[],
    &[1],
    &[0, 2],
    &[0, 1, 2],
    &[0, 2, 5, 7],
    &[0, 1, 2, 5, 7],
    &[0, 1, 2, 5, 7, 8],
    &[0, 1, 2, 3, 4, 6, 8],
    &[0, 1, 2, 3, 4, 5, 7, 8],
    &[0, 1, 2, 3, 4, 5, 6, 7, 8],
];

/// FLAC channel order to Vorbis channel order, indexed by channel count.
static FLAC_TO_VORBIS: [&[usize]; 9] = [
    &[],
    &[0],
    &[0, 1],
    &[0, 2, 1],
    &[0, 1, 2, 3],
    &[0, 2, 1, 3, 4],
    &[0, 2, 1, 5, 3, 4],
    &[0, 2, 1, 6, 5, 3, 4],
    &[0, 2, 1, 7, 5, 6, 3, 4],
];

/// Vorbis channel order to FLAC channel order, indexed by channel count.
static VORBIS_TO_FLAC: [&[usize]; 9] = [
    &[],
    &[0],
    &[0, 1],
    &[0, 2, 1],
    &[0, 1, 2, 3],
    &[0, 2, 1, 3, 4],
    &[0, 2, 1, 4, 5, 3],
    &[0, 2, 1, 5, 6, 4, 3],
    &[0, 2, 1, 6, 7, 4, 5, 3],
];

/// FLAC channel order to canonical slot (FLAC to Vorbis, then Vorbis to canonical).
static FLAC_TO_CANONICAL: [&[usize]; 9] = [
    &[],
    &[1],
    &[0, 2],
    &[0, 2, 1],
    &[0, 2, 5, 7],
    &[0, 2, 1, 5, 7],
    &[0, 2, 1, 8, 5, 7],
    &[0, 2, 1, 8, 6, 3, 4],
    &[0, 2, 1, 8, 5, 7, 3, 4],
];

impl SurroundProfile {
    /// All profiles ordered by channel count.
    pub const ALL: [SurroundProfile; CANONICAL_CHANNELS + 1] = [
        SurroundProfile::Silence,
        SurroundProfile::Mono,
        SurroundProfile::Stereo,
        SurroundProfile::LinearSurround,
        SurroundProfile::Quadraphonic,
        SurroundProfile::FivePointZero,
        SurroundProfile::FivePointOne,
        SurroundProfile::SixPointOne,
        SurroundProfile::SevenPointOne,
        SurroundProfile::EightPointOne,
    ];

    /// Looks up the profile for a channel count.
    ///
    /// # Arguments
    ///
    /// * `channels` - Number of channels in the stream.
    ///
    /// # Returns
    ///
    /// The matching profile, or `None` above 9 channels.
    #[must_use]
    pub fn for_channels(channels: usize) -> Option<Self> {
        Self::ALL.get(channels).copied()
    }

    /// Number of channels this profile carries.
    #[must_use]
    pub fn channel_count(self) -> usize {
        self.canonical_slots().len()
    }

    /// Canonical slots occupied by this profile, in Vorbis channel order.
    #[must_use]
    pub fn canonical_slots(self) -> &'static [usize] {
        VORBIS_TO_CANONICAL[self as usize]
    }

    /// Speaker positions of this profile, in Vorbis channel order.
    #[must_use]
    pub fn positions(self) -> Vec<SpeakerPosition> {
        self.canonical_slots()
            .iter()
            .map(|&slot| CANONICAL_ORDER[slot])
            .collect()
    }

    /// Short human readable label, as shown next to the track metadata.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Silence => "silence",
            Self::Mono => "mono",
            Self::Stereo => "stereo",
            Self::LinearSurround => "3.0",
            Self::Quadraphonic => "quad",
            Self::FivePointZero => "5.0",
            Self::FivePointOne => "5.1",
            Self::SixPointOne => "6.1",
            Self::SevenPointOne => "7.1",
            Self::EightPointOne => "8.1",
        }
    }
}

/// Returns the canonical slot for every native channel of a stream.
///
/// Entry `i` of the returned slice is the canonical slot that native channel
/// `i` is written to.
///
/// # Arguments
///
/// * `codec` - Codec family that defines the native channel order.
/// * `channels` - Native channel count.
///
/// # Returns
///
/// The slot table, or `None` when the codec cannot carry that many channels.
#[must_use]
pub fn canonical_slots(codec: Codec, channels: usize) -> Option<&'static [usize]> {
    if channels == 0 {
        return None;
    }
    match codec {
        Codec::Vorbis => VORBIS_TO_CANONICAL.get(channels).copied(),
        Codec::Opus if channels <= 8 => Some(VORBIS_TO_CANONICAL[channels]),
        Codec::Flac => FLAC_TO_CANONICAL.get(channels).copied(),
        Codec::Opus => None,
    }
}

/// FLAC native order to Vorbis order for a channel count.
#[must_use]
pub fn flac_to_vorbis(channels: usize) -> Option<&'static [usize]> {
    FLAC_TO_VORBIS.get(channels).copied()
}

/// Vorbis order to FLAC native order for a channel count.
#[must_use]
pub fn vorbis_to_flac(channels: usize) -> Option<&'static [usize]> {
    VORBIS_TO_FLAC.get(channels).copied()
}

/// Folds one canonical frame down to a device with fewer channels.
///
/// Nine or more device channels receive the canonical slots unchanged.
/// Stereo devices receive left and right sums with the center, surround and
/// LFE slots attenuated by 3 dB; mono devices receive the average of that
/// stereo pair. Other channel counts take the leading canonical slots.
///
/// # Arguments
///
/// * `frame` - One canonical frame of [`CANONICAL_CHANNELS`] samples.
/// * `out` - Destination device frame.
pub fn fold_down(frame: &[f32], out: &mut [f32]) {
    const ATTENUATION: f32 = std::f32::consts::FRAC_1_SQRT_2;

    match out.len() {
        0 => {}
        1 | 2 => {
            let center = (frame[1] + frame[8]) * ATTENUATION;
            let left = frame[0] + center + (frame[3] + frame[5] + frame[6] * 0.5) * ATTENUATION;
            let right = frame[2] + center + (frame[4] + frame[7] + frame[6] * 0.5) * ATTENUATION;
            if out.len() == 1 {
                out[0] = (left + right) * 0.5;
            } else {
                out[0] = left;
                out[1] = right;
            }
        }
        n => {
            let shared = n.min(CANONICAL_CHANNELS);
            out[..shared].copy_from_slice(&frame[..shared]);
            out[shared..].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::audio::{
        channel_layout::{
            CANONICAL_CHANNELS, SurroundProfile, canonical_slots, flac_to_vorbis, fold_down,
            vorbis_to_flac,
        },
        track::Codec,
    };

    fn assert_bijection(codec: Codec, channels: usize) {
        let slots = canonical_slots(codec, channels).unwrap();
        assert_eq!(slots.len(), channels, "{codec} {channels}ch table length");

        let unique: HashSet<usize> = slots.iter().copied().collect();
        assert_eq!(unique.len(), channels, "{codec} {channels}ch writes a slot twice");

        let expected: HashSet<usize> = SurroundProfile::for_channels(channels)
            .unwrap()
            .canonical_slots()
            .iter()
            .copied()
            .collect();
        assert_eq!(unique, expected, "{codec} {channels}ch lands outside its profile");
    }

    #[test]
    fn test_every_codec_maps_onto_its_profile() {
        for channels in 1..=8 {
            assert_bijection(Codec::Opus, channels);
            assert_bijection(Codec::Vorbis, channels);
            assert_bijection(Codec::Flac, channels);
        }
        assert_bijection(Codec::Vorbis, 9);
    }

    #[test]
    fn test_unsupported_channel_counts() {
        assert!(canonical_slots(Codec::Opus, 0).is_none());
        assert!(canonical_slots(Codec::Opus, 9).is_none());
        assert!(canonical_slots(Codec::Flac, 9).is_none());
        assert!(canonical_slots(Codec::Vorbis, 10).is_none());
    }

    #[test]
    fn test_flac_table_is_composition() {
        for channels in 1..=8 {
            let to_vorbis = flac_to_vorbis(channels).unwrap();
            let vorbis = SurroundProfile::for_channels(channels)
                .unwrap()
                .canonical_slots();
            let composed: Vec<usize> = to_vorbis.iter().map(|&v| vorbis[v]).collect();
            assert_eq!(canonical_slots(Codec::Flac, channels).unwrap(), composed);
        }
    }

    #[test]
    fn test_flac_vorbis_tables_are_inverse() {
        for channels in 1..=8 {
            let forward = flac_to_vorbis(channels).unwrap();
            let backward = vorbis_to_flac(channels).unwrap();
            for (flac, &vorbis) in forward.iter().enumerate() {
                assert_eq!(backward[vorbis], flac, "{channels}ch channel {flac}");
            }
        }
    }

    #[test]
    fn test_profiles() {
        assert_eq!(SurroundProfile::ALL.len(), 10);
        for (channels, profile) in SurroundProfile::ALL.iter().enumerate() {
            assert_eq!(profile.channel_count(), channels);
            assert_eq!(profile.positions().len(), channels);
        }
        assert_eq!(
            SurroundProfile::for_channels(6),
            Some(SurroundProfile::FivePointOne)
        );
        assert_eq!(SurroundProfile::for_channels(10), None);
    }

    #[test]
    fn test_fold_down() {
        let mut frame = [0.0f32; CANONICAL_CHANNELS];
        frame[0] = 0.25;
        frame[2] = -0.5;

        let mut stereo = [1.0f32; 2];
        fold_down(&frame, &mut stereo);
        assert_eq!(stereo, [0.25, -0.5]);

        let mut mono = [1.0f32; 1];
        fold_down(&frame, &mut mono);
        assert!((mono[0] + 0.125).abs() < 1e-6);

        let mut wide = [1.0f32; 12];
        fold_down(&frame, &mut wide);
        assert_eq!(&wide[..CANONICAL_CHANNELS], &frame);
        assert!(wide[CANONICAL_CHANNELS..].iter().all(|&s| s == 0.0));
    }
}
