//! Shared decoding core for all codec backends.
//!
//! A [`LinkDecoder`] owns the `symphonia` format reader and codec decoder of
//! one link, pulls native packets on demand and feeds them through a
//! [`CanonicalStage`], which resamples to the output rate and places every
//! native channel into its canonical slot. Backends add the codec-specific
//! parts (loudness tags, metadata quirks) on top.

use std::{collections::VecDeque, io::ErrorKind::UnexpectedEof, path::Path, sync::OnceLock};

use {
    symphonia::{
        core::{
            audio::SampleBuffer,
            codecs::{CODEC_TYPE_NULL, CodecParameters, CodecRegistry, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader, SeekMode::Accurate, SeekTo::Time},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            units::Time as SeekTime,
        },
        default::{
            codecs::{FlacDecoder, VorbisDecoder},
            formats::{FlacReader, OggReader},
        },
    },
    symphonia_adapter_libopus::OpusDecoder,
    tracing::{debug, warn},
};

use crate::audio::{
    channel_layout::canonical_slots,
    link_source::{LinkRange, LinkSource},
    metadata::TagList,
    resampler::AudioResampler,
    track::{Codec, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, TrackError},
};

/// Consecutive corrupt packets tolerated before decoding gives up.
pub const MAX_DECODE_RETRIES: usize = 8;

/// Physical container of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Native FLAC stream (`fLaC` magic).
    Flac,
    /// Ogg page stream (`OggS` magic).
    Ogg,
}

/// Codec registry with Opus, Vorbis and FLAC decoders.
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<OpusDecoder>();
        registry.register_all::<VorbisDecoder>();
        registry.register_all::<FlacDecoder>();
        registry
    })
}

/// Resampling and channel placement of decoded native frames.
///
/// Native interleaved frames go in, canonical interleaved frames at the
/// output rate come out. Output is buffered until the caller drains it.
pub struct CanonicalStage {
    native_channels: usize,
    channel_map: &'static [usize],
    resampler: Option<AudioResampler>,
    resampled: Vec<f32>,
    pending: VecDeque<f32>,
    skip_frames: u64,
}

impl CanonicalStage {
    /// Creates a stage for one stream.
    ///
    /// # Arguments
    ///
    /// * `codec` - Codec family, selects the channel table.
    /// * `channels` - Native channel count.
    /// * `sample_rate` - Native sample rate; no resampler is built at the output rate.
    ///
    /// # Errors
    ///
    /// Returns `TrackError::UnsupportedChannels` when the codec cannot map
    /// `channels`, or a resampling error for an unusable rate.
    pub fn new(codec: Codec, channels: usize, sample_rate: u32) -> Result<Self, TrackError> {
        let channel_map = canonical_slots(codec, channels)
            .ok_or(TrackError::UnsupportedChannels { codec, channels })?;

        let resampler = if sample_rate == OUTPUT_SAMPLE_RATE {
            None
        } else {
            Some(AudioResampler::new(
                sample_rate,
                OUTPUT_SAMPLE_RATE,
                channels,
            )?)
        };

        Ok(Self {
            native_channels: channels,
            channel_map,
            resampler,
            resampled: Vec::new(),
            pending: VecDeque::new(),
            skip_frames: 0,
        })
    }

    /// Adds a block of native interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns a resampling error if conversion fails.
    pub fn push(&mut self, native: &[f32]) -> Result<(), TrackError> {
        let ch = self.native_channels;
        let frames = native.len() / ch;

        let skip = self.skip_frames.min(frames as u64) as usize;
        self.skip_frames -= skip as u64;
        let native = &native[skip * ch..frames * ch];

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(native, &mut self.resampled)?;
                scatter(&self.resampled, ch, self.channel_map, &mut self.pending);
            }
            None => scatter(native, ch, self.channel_map, &mut self.pending),
        }

        Ok(())
    }

    /// Drains the resampler tail at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns a resampling error if conversion fails.
    pub fn finish(&mut self) -> Result<(), TrackError> {
        if let Some(resampler) = self.resampler.as_mut() {
            self.resampled.clear();
            resampler.flush(&mut self.resampled)?;
            scatter(
                &self.resampled,
                self.native_channels,
                self.channel_map,
                &mut self.pending,
            );
        }
        Ok(())
    }

    /// Moves buffered canonical frames into `out`, scaled by `scale`.
    ///
    /// # Returns
    ///
    /// The number of frames written, at most `frames`.
    pub fn drain_into(&mut self, out: &mut [f32], frames: usize, scale: f32) -> usize {
        let wanted = frames.min(out.len() / OUTPUT_CHANNELS) * OUTPUT_CHANNELS;
        let available = self.pending.len().min(wanted);
        for (dst, sample) in out[..available]
            .iter_mut()
            .zip(self.pending.drain(..available))
        {
            *dst = sample * scale;
        }
        available / OUTPUT_CHANNELS
    }

    /// Canonical frames ready to be drained.
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.pending.len() / OUTPUT_CHANNELS
    }

    /// Drops the next `frames` native frames that are pushed.
    pub fn skip(&mut self, frames: u64) {
        self.skip_frames = frames;
    }

    /// Discards all buffered and streaming state.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.skip_frames = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// Writes native frames into canonical frames.
fn scatter(native: &[f32], channels: usize, map: &[usize], pending: &mut VecDeque<f32>) {
    for frame in native.chunks_exact(channels) {
        let mut canonical = [0.0f32; OUTPUT_CHANNELS];
        for (&sample, &slot) in frame.iter().zip(map) {
            canonical[slot] = sample;
        }
        pending.extend(canonical);
    }
}

/// Counts one corrupt packet against the retry budget.
fn record_failure(failures: &mut usize, error: SymphoniaError) -> Result<(), TrackError> {
    *failures += 1;
    if *failures > MAX_DECODE_RETRIES {
        return Err(TrackError::Corrupt {
            attempts: *failures,
            reason: error.to_string(),
        });
    }
    warn!(attempt = *failures, error = %error, "Skipping corrupt packet");
    Ok(())
}

/// A link opened for decoding, with what the backends need to describe it.
pub struct OpenedLink {
    /// The decoder, ready to produce canonical frames.
    pub decoder: LinkDecoder,
    /// Codec parameters of the selected audio track.
    pub params: CodecParameters,
    /// Tags found while opening.
    pub tags: TagList,
    /// Length of the link in bytes.
    pub byte_len: u64,
}

/// Decoder for one link of a file.
pub struct LinkDecoder {
    /// The underlying format reader.
    format: Box<dyn FormatReader>,
    /// The codec decoder.
    decoder: Box<dyn Decoder>,
    /// Id of the audio track inside the container.
    track_id: u32,
    /// Native channel count.
    native_channels: usize,
    /// Interleaved copy of the last decoded block.
    sample_buf: Option<SampleBuffer<f32>>,
    /// Frame capacity of `sample_buf`.
    sample_buf_frames: usize,
    /// Resampling and channel placement.
    stage: CanonicalStage,
    /// Whether the container has no more packets.
    finished: bool,
}

impl LinkDecoder {
    /// Opens one link of a file.
    ///
    /// # Arguments
    ///
    /// * `path` - The physical file.
    /// * `range` - Byte range of the link.
    /// * `container` - Container format of the link.
    /// * `codec` - Codec family the link was classified as.
    ///
    /// # Returns
    ///
    /// A `Result` containing the opened link.
    ///
    /// # Errors
    ///
    /// Returns `TrackError` if the file cannot be read, the container has no
    /// audio track or the codec parameters are unusable.
    pub fn open(
        path: &Path,
        range: LinkRange,
        container: ContainerKind,
        codec: Codec,
    ) -> Result<OpenedLink, TrackError> {
        let source = LinkSource::open(path, range)?;
        let byte_len = source.len();
        let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let mut format: Box<dyn FormatReader> = match container {
            ContainerKind::Flac => Box::new(FlacReader::try_new(mss, &format_opts)?),
            ContainerKind::Ogg => Box::new(OggReader::try_new(mss, &format_opts)?),
        };

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(TrackError::NoAudioTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let channels = params.channels.map_or(0, |c| c.count());
        let sample_rate = params.sample_rate.ok_or(TrackError::NoAudioTrack)?;
        let stage = CanonicalStage::new(codec, channels, sample_rate)?;

        let decoder = codec_registry().make(&params, &DecoderOptions::default())?;
        let tags = TagList::from_format(format.as_mut());

        debug!(
            path = %path.display(),
            start = range.start,
            end = ?range.end,
            %codec,
            channels,
            sample_rate,
            "Opened link"
        );

        Ok(OpenedLink {
            decoder: LinkDecoder {
                format,
                decoder,
                track_id,
                native_channels: channels,
                sample_buf: None,
                sample_buf_frames: 0,
                stage,
                finished: false,
            },
            params,
            tags,
            byte_len,
        })
    }

    /// Decodes up to `frames` canonical frames into `out`.
    ///
    /// # Arguments
    ///
    /// * `out` - Interleaved canonical destination.
    /// * `frames` - Frames requested.
    /// * `scale` - Linear gain applied to every sample.
    ///
    /// # Returns
    ///
    /// Frames written; fewer than requested only at the end of the link.
    ///
    /// # Errors
    ///
    /// Returns `TrackError::Corrupt` once the retry budget is exhausted, or
    /// any other decoder error.
    pub fn read(&mut self, out: &mut [f32], frames: usize, scale: f32) -> Result<usize, TrackError> {
        let frames = frames.min(out.len() / OUTPUT_CHANNELS);

        while self.stage.buffered_frames() < frames && !self.finished {
            if !self.pull_block()? {
                self.stage.finish()?;
                self.finished = true;
            }
        }

        Ok(self.stage.drain_into(out, frames, scale))
    }

    /// Seeks the container to `seconds` and discards buffered audio.
    ///
    /// # Errors
    ///
    /// Returns `TrackError::SeekFailed` if the container cannot reach the
    /// target; the decoder is reset and stays usable.
    pub fn seek(&mut self, seconds: f64) -> Result<(), TrackError> {
        self.stage.clear();
        self.finished = false;

        let time = SeekTime::new(seconds.trunc() as u64, seconds.fract());
        let result = self.format.seek(
            Accurate,
            Time {
                time,
                track_id: Some(self.track_id),
            },
        );
        self.decoder.reset();

        match result {
            Ok(seeked) => {
                self.stage
                    .skip(seeked.required_ts.saturating_sub(seeked.actual_ts));
                Ok(())
            }
            Err(e) => Err(TrackError::SeekFailed {
                target: seconds,
                reason: e.to_string(),
            }),
        }
    }

    /// Marks the link as fully played without touching the container.
    pub fn mark_finished(&mut self) {
        self.stage.clear();
        self.finished = true;
    }

    /// Decodes the next packet of the audio track into the stage.
    ///
    /// # Returns
    ///
    /// `false` at the end of the container.
    fn pull_block(&mut self) -> Result<bool, TrackError> {
        let mut failures = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => return Ok(false),
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e @ (SymphoniaError::DecodeError(_) | SymphoniaError::IoError(_))) => {
                    record_failure(&mut failures, e)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let frames = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if spec.channels.count() != self.native_channels {
                        return Err(TrackError::Corrupt {
                            attempts: failures + 1,
                            reason: format!(
                                "channel count changed from {} to {}",
                                self.native_channels,
                                spec.channels.count()
                            ),
                        });
                    }

                    let capacity = decoded.capacity();
                    if self.sample_buf.is_none() || self.sample_buf_frames < capacity {
                        self.sample_buf = Some(SampleBuffer::new(capacity as u64, spec));
                        self.sample_buf_frames = capacity;
                    }

                    match self.sample_buf.as_mut() {
                        Some(buf) => {
                            buf.copy_interleaved_ref(decoded);
                            buf.len() / self.native_channels
                        }
                        None => 0,
                    }
                }
                Err(e @ (SymphoniaError::DecodeError(_) | SymphoniaError::IoError(_))) => {
                    record_failure(&mut failures, e)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(buf) = self.sample_buf.as_ref() {
                self.stage
                    .push(&buf.samples()[..frames * self.native_channels])?;
            }

            return Ok(true);
        }
    }
}
