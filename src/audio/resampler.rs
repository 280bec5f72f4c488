//! Streaming sample rate conversion for decoded tracks.
//!
//! This module converts a track's native rate to the fixed output rate using
//! the `rubato` asynchronous sinc resampler. Input arrives in arbitrary block
//! sizes from the decoder and is accumulated into the fixed chunks rubato
//! expects; the resampler's own latency is trimmed so consecutive tracks stay
//! gapless.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as StdResult},
};

use {
    audioadapter_buffers::direct::InterleavedSlice,
    rubato::{
        Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
        SincInterpolationType, WindowFunction, calculate_cutoff,
    },
    tracing::debug,
};

/// Error type for resampling operations.
#[derive(Debug)]
pub enum ResamplingError {
    /// Rubato resampling error.
    RubatoError(String),
    /// Invalid configuration.
    InvalidConfiguration(String),
}

impl Display for ResamplingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> StdResult {
        match self {
            ResamplingError::RubatoError(msg) => write!(f, "Rubato error: {}", msg),
            ResamplingError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl Error for ResamplingError {}

/// Streaming multi-channel resampler over interleaved samples.
pub struct AudioResampler {
    /// Rubato resampler instance.
    resampler: Async<f32>,
    /// Source sample rate in Hz.
    source_rate: u32,
    /// Target sample rate in Hz.
    target_rate: u32,
    /// Number of channels.
    channels: usize,
    /// Fixed input chunk size per channel expected by rubato.
    chunk_size: usize,
    /// Accumulated interleaved input that does not fill a chunk yet.
    input_buffer: Vec<f32>,
    /// Scratch output for one chunk.
    output_buffer: Vec<f32>,
    /// Leading output frames still to drop (resampler latency).
    delay_remaining: usize,
    /// Input frames consumed since the last reset.
    frames_in: u64,
    /// Output frames emitted since the last reset.
    frames_out: u64,
}

impl AudioResampler {
    /// Creates a new audio resampler.
    ///
    /// # Arguments
    ///
    /// * `source_rate` - Source sample rate in Hz.
    /// * `target_rate` - Target sample rate in Hz.
    /// * `channels` - Number of audio channels.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AudioResampler` or a `ResamplingError`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the resampler cannot be created or if rates are invalid.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplingError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if source_rate == target_rate {
            return Err(ResamplingError::InvalidConfiguration(
                "Source and target rates must be different".to_string(),
            ));
        }

        if channels == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        let chunk_size = calculate_chunk_size(source_rate, target_rate);

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f64::from(target_rate) / f64::from(source_rate),
            1.1,
            &params,
            chunk_size,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        debug!(source_rate, target_rate, channels, chunk_size, "Created resampler");

        let delay_remaining = resampler.output_delay();

        Ok(AudioResampler {
            resampler,
            source_rate,
            target_rate,
            channels,
            chunk_size,
            input_buffer: Vec::with_capacity(chunk_size * channels),
            output_buffer: Vec::new(),
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Resamples a block of interleaved samples.
    ///
    /// Frames that do not complete a chunk are kept until the next call or
    /// until [`AudioResampler::flush`].
    ///
    /// # Arguments
    ///
    /// * `input_samples` - Interleaved input samples.
    /// * `output` - Destination; resampled interleaved frames are appended.
    ///
    /// # Returns
    ///
    /// The number of frames appended to `output`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if resampling fails.
    pub fn process(
        &mut self,
        input_samples: &[f32],
        output: &mut Vec<f32>,
    ) -> Result<usize, ResamplingError> {
        self.input_buffer.extend_from_slice(input_samples);

        let chunk_samples = self.chunk_size * self.channels;
        let mut produced = 0;
        while self.input_buffer.len() >= chunk_samples {
            produced += self.run_chunk(None, None, output)?;
            self.input_buffer.drain(..chunk_samples);
        }

        Ok(produced)
    }

    /// Drains buffered input at the end of a stream.
    ///
    /// After flushing, the total output length matches the total input length
    /// scaled by the rate ratio.
    ///
    /// # Arguments
    ///
    /// * `output` - Destination; the remaining frames are appended.
    ///
    /// # Returns
    ///
    /// The number of frames appended to `output`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if resampling fails.
    pub fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize, ResamplingError> {
        let expected = self.expected_output_size(self.frames_in + self.pending_frames() as u64);
        let mut produced = 0;

        let remaining = self.pending_frames();
        if remaining > 0 {
            produced += self.run_chunk(Some(remaining), Some(expected), output)?;
            self.input_buffer.clear();
        }

        // Zero-length chunks push the latency tail out of the filter.
        let mut rounds = 0;
        while self.frames_out < expected && rounds < 4 {
            produced += self.run_chunk(Some(0), Some(expected), output)?;
            rounds += 1;
        }

        Ok(produced)
    }

    /// Discards all streaming state, as after a seek.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.input_buffer.clear();
        self.delay_remaining = self.resampler.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
    }

    /// Gets the expected output size for a given input size.
    ///
    /// # Arguments
    ///
    /// * `input_frames` - Number of input frames.
    ///
    /// # Returns
    ///
    /// Expected number of output frames.
    #[must_use]
    pub fn expected_output_size(&self, input_frames: u64) -> u64 {
        let in_rate = u64::from(self.source_rate);
        let out_rate = u64::from(self.target_rate);
        (input_frames * out_rate + in_rate / 2) / in_rate
    }

    /// Number of channels processed.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    fn pending_frames(&self) -> usize {
        self.input_buffer.len() / self.channels
    }

    /// Runs one rubato chunk and appends its output past the latency trim.
    fn run_chunk(
        &mut self,
        partial_len: Option<usize>,
        limit: Option<u64>,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResamplingError> {
        let ch = self.channels;
        let frames_in = partial_len.unwrap_or(self.chunk_size);

        let input_adapter =
            InterleavedSlice::new(&self.input_buffer[..frames_in * ch], ch, frames_in)
                .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        let out_frames = self.resampler.output_frames_next();
        self.output_buffer.resize(out_frames * ch, 0.0);
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.output_buffer, ch, out_frames)
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        self.frames_in += frames_in as u64;

        let skip = self.delay_remaining.min(nbr_out);
        self.delay_remaining -= skip;

        let mut frames = nbr_out - skip;
        if let Some(limit) = limit {
            frames = frames.min(limit.saturating_sub(self.frames_out) as usize);
        }

        output.extend_from_slice(&self.output_buffer[skip * ch..(skip + frames) * ch]);
        self.frames_out += frames as u64;

        Ok(frames)
    }
}

/// Calculates an appropriate chunk size for resampling based on sample rates.
fn calculate_chunk_size(source_rate: u32, target_rate: u32) -> usize {
    let gcd = gcd(source_rate, target_rate);
    let lcm = (source_rate as u64 * target_rate as u64) / gcd as u64;

    // One period of the rate ratio, kept within real-time friendly bounds.
    let base_chunk = (lcm / source_rate as u64).min(4096) as usize;

    base_chunk.clamp(256, 8192)
}

/// Calculates the greatest common divisor of two numbers.
fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}
