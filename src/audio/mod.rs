//! Audio playback system.
//!
//! Gapless playback of Opus, Vorbis and FLAC streams using symphonia, rubato,
//! cpal and rtrb. Every track decodes into one canonical 48 kHz surround
//! layout; the engine stitches tracks together and the output folds the
//! layout down to whatever the device offers.

pub mod backends;
pub mod channel_layout;
pub mod decoder;
pub mod demux;
pub mod engine;
pub mod link_source;
pub mod metadata;
pub mod output;
pub mod playlist;
pub mod resampler;
pub mod track;

#[cfg(test)]
pub mod codec_tests;
#[cfg(test)]
pub mod test_support;
