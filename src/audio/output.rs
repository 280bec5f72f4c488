//! Audio output using the `cpal` crate.
//!
//! A producer thread fills canonical frames from the shared player into a
//! lock-free ring buffer. The device callback pops whole frames, folds them
//! down to the device's channel count and plays silence on underrun or while
//! the output is corked.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{Builder as ThreadBuilder, JoinHandle, sleep},
    time::{Duration, Instant},
};

use {
    cpal::{
        BufferSize, BuildStreamError, Device, FromSample, OutputCallbackInfo, PlayStreamError,
        Sample,
        SampleFormat::{self, F32, I16, U16},
        SizedSample, Stream, StreamConfig, SupportedStreamConfigsError, default_host,
        traits::{DeviceTrait, HostTrait, StreamTrait},
    },
    rtrb::{Consumer, Producer, RingBuffer},
    thiserror::Error,
    tracing::{debug, error, info, warn},
};

use crate::{
    audio::{
        channel_layout::fold_down,
        engine::FillOutcome,
        track::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE},
    },
    state::player_state::{OutputLink, PlayerEvent, SharedPlayer},
};

/// Frames produced per fill.
const PERIOD_FRAMES: usize = 1024;

/// Pause of the producer when the ring buffer is full or the output corked.
const PRODUCER_IDLE: Duration = Duration::from_millis(5);

/// Error type for audio output operations.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Building the stream failed.
    #[error("Audio output error: {0}")]
    CpalError(#[from] BuildStreamError),
    /// Failed to start audio stream.
    #[error("Failed to start audio stream: {0}")]
    StreamStartError(#[from] PlayStreamError),
    /// The device configuration could not be queried.
    #[error("Failed to query device configuration: {0}")]
    ConfigQueryError(String),
    /// No suitable audio device found.
    #[error("No suitable audio device found")]
    NoDeviceFound,
    /// The requested device does not exist.
    #[error("Audio device not found: {name}")]
    DeviceNotFound { name: String },
    /// The device cannot run at the output sample rate.
    #[error("Device does not support {rate} Hz")]
    UnsupportedSampleRate { rate: u32 },
    /// Unsupported sample format.
    #[error("Unsupported sample format: {format:?}")]
    UnsupportedSampleFormat { format: SampleFormat },
    /// The producer thread could not be started.
    #[error("Failed to spawn producer thread: {0}")]
    ThreadError(#[from] std::io::Error),
}

impl From<SupportedStreamConfigsError> for OutputError {
    fn from(e: SupportedStreamConfigsError) -> Self {
        OutputError::ConfigQueryError(e.to_string())
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Device description to open, the host default when `None`.
    pub device: Option<String>,
    /// Ring buffer length in milliseconds.
    pub buffer_ms: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_ms: 200,
        }
    }
}

impl OutputConfig {
    /// Ring buffer capacity in samples, at least two producer periods.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        let frames = (OUTPUT_SAMPLE_RATE as usize * self.buffer_ms as usize / 1000)
            .max(2 * PERIOD_FRAMES);
        frames * OUTPUT_CHANNELS
    }
}

/// Manages the output device and its stream.
pub struct AudioOutput {
    /// The selected output device.
    device: Device,
    /// Output configuration.
    config: OutputConfig,
}

impl AudioOutput {
    /// Opens the configured output device.
    ///
    /// # Arguments
    ///
    /// * `config` - Output configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AudioOutput` or an `OutputError`.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if:
    /// - No default device exists
    /// - The named device is not found
    pub fn new(config: OutputConfig) -> Result<Self, OutputError> {
        let host = default_host();

        let device = match &config.device {
            Some(name) => host
                .output_devices()
                .map_err(|_| OutputError::NoDeviceFound)?
                .find(|device| {
                    device
                        .description()
                        .is_ok_and(|desc| desc.to_string() == *name)
                })
                .ok_or_else(|| OutputError::DeviceNotFound { name: name.clone() })?,
            None => host
                .default_output_device()
                .ok_or(OutputError::NoDeviceFound)?,
        };

        Ok(Self { device, config })
    }

    /// Picks a 48 kHz stream configuration with as many channels as the
    /// canonical layout can use.
    ///
    /// # Returns
    ///
    /// The stream configuration and its sample format.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::UnsupportedSampleRate` if no configuration
    /// accepts the output rate.
    pub fn stream_config(&self) -> Result<(StreamConfig, SampleFormat), OutputError> {
        let mut best = None;

        for config in self.device.supported_output_configs()? {
            if config.min_sample_rate() > OUTPUT_SAMPLE_RATE
                || config.max_sample_rate() < OUTPUT_SAMPLE_RATE
                || !is_playable_format(config.sample_format())
            {
                continue;
            }

            let channels = usize::from(config.channels());
            let score = if channels <= OUTPUT_CHANNELS {
                channels * 2
            } else {
                1
            };
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                best = Some((score, config));
            }
        }

        let (_, config) = best.ok_or(OutputError::UnsupportedSampleRate {
            rate: OUTPUT_SAMPLE_RATE,
        })?;
        let format = config.sample_format();
        let config = config.with_sample_rate(OUTPUT_SAMPLE_RATE);

        Ok((
            StreamConfig {
                channels: config.channels(),
                sample_rate: config.sample_rate(),
                buffer_size: BufferSize::Default,
            },
            format,
        ))
    }

    /// Creates the output stream.
    ///
    /// # Arguments
    ///
    /// * `consumer` - Ring buffer consumer of canonical frames.
    /// * `link` - Cork and flush flags shared with the player.
    ///
    /// # Returns
    ///
    /// A `Result` containing the started CPAL stream or an `OutputError`.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if stream creation or startup fails.
    pub fn create_stream(
        &self,
        consumer: Consumer<f32>,
        link: Arc<OutputLink>,
    ) -> Result<Stream, OutputError> {
        let (stream_config, format) = self.stream_config()?;
        let channels = usize::from(stream_config.channels);
        info!(
            device = %self.current_device_name(),
            channels,
            ?format,
            "Opening output stream"
        );

        let renderer = FrameRenderer::new(consumer, link, channels);
        let stream = match format {
            F32 => self.build::<f32>(&stream_config, renderer)?,
            I16 => self.build::<i16>(&stream_config, renderer)?,
            U16 => self.build::<u16>(&stream_config, renderer)?,
            format => return Err(OutputError::UnsupportedSampleFormat { format }),
        };
        stream.play()?;
        Ok(stream)
    }

    fn build<T>(
        &self,
        stream_config: &StreamConfig,
        mut renderer: FrameRenderer,
    ) -> Result<Stream, OutputError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let timeout = Duration::from_millis(u64::from(self.config.buffer_ms));
        let stream = self.device.build_output_stream(
            stream_config,
            move |data: &mut [T], _: &OutputCallbackInfo| renderer.render(data),
            |err| error!(error = %err, "Audio stream error"),
            Some(timeout),
        )?;
        Ok(stream)
    }

    /// Gets the current device name.
    ///
    /// # Returns
    ///
    /// The name of the current output device, or "Unknown" if unavailable.
    pub fn current_device_name(&self) -> String {
        self.device
            .description()
            .map(|desc| desc.to_string())
            .unwrap_or_else(|_| "Unknown".to_string())
    }
}

fn is_playable_format(format: SampleFormat) -> bool {
    matches!(format, F32 | I16 | U16)
}

/// Device-side half of the ring buffer.
///
/// Pops canonical frames and writes them in the device's channel count.
pub struct FrameRenderer {
    consumer: Consumer<f32>,
    link: Arc<OutputLink>,
    channels: usize,
    frame: [f32; OUTPUT_CHANNELS],
    folded: Vec<f32>,
}

impl FrameRenderer {
    /// Creates a renderer for a device with `channels` channels.
    #[must_use]
    pub fn new(consumer: Consumer<f32>, link: Arc<OutputLink>, channels: usize) -> Self {
        Self {
            consumer,
            link,
            channels: channels.max(1),
            frame: [0.0; OUTPUT_CHANNELS],
            folded: vec![0.0; channels.max(1)],
        }
    }

    /// Fills one device buffer.
    ///
    /// Plays silence while corked or when fewer than one canonical frame is
    /// buffered. A pending flush drops every complete buffered frame first.
    pub fn render<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        if self.link.take_flush() {
            let stale = self.consumer.slots() / OUTPUT_CHANNELS * OUTPUT_CHANNELS;
            if let Ok(chunk) = self.consumer.read_chunk(stale) {
                chunk.commit_all();
            }
        }

        let corked = self.link.is_corked();
        for out in data.chunks_mut(self.channels) {
            if corked || !self.pop_frame() {
                out.fill(T::EQUILIBRIUM);
                continue;
            }

            fold_down(&self.frame, &mut self.folded);
            for (sample, &value) in out.iter_mut().zip(&self.folded) {
                *sample = T::from_sample(value.clamp(-1.0, 1.0));
            }
        }
    }

    fn pop_frame(&mut self) -> bool {
        let Ok(chunk) = self.consumer.read_chunk(OUTPUT_CHANNELS) else {
            return false;
        };
        let (first, second) = chunk.as_slices();
        self.frame[..first.len()].copy_from_slice(first);
        self.frame[first.len()..].copy_from_slice(second);
        chunk.commit_all();
        true
    }
}

/// Creates the ring buffer shared by producer and renderer.
#[must_use]
pub fn ring_buffer(config: &OutputConfig) -> (Producer<f32>, Consumer<f32>) {
    RingBuffer::new(config.ring_capacity())
}

/// Thread feeding the ring buffer from the shared player.
pub struct PlaybackProducer {
    player: SharedPlayer,
    producer: Producer<f32>,
    running: Arc<AtomicBool>,
    buffer: Vec<f32>,
}

impl PlaybackProducer {
    /// Creates a producer.
    ///
    /// # Arguments
    ///
    /// * `player` - The shared player to fill from.
    /// * `producer` - Ring buffer producer.
    ///
    /// # Returns
    ///
    /// A new `PlaybackProducer`.
    #[must_use]
    pub fn new(player: SharedPlayer, producer: Producer<f32>) -> Self {
        Self {
            player,
            producer,
            running: Arc::new(AtomicBool::new(true)),
            buffer: vec![0.0; PERIOD_FRAMES * OUTPUT_CHANNELS],
        }
    }

    /// Flag that stops the thread when cleared.
    #[must_use]
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Starts the producer thread.
    ///
    /// The thread ends when the running flag is cleared, when the playlist
    /// is exhausted or on a fatal decode error. Exhaustion is reported once
    /// the ring buffer has drained.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::ThreadError` if the thread cannot be spawned.
    pub fn spawn(mut self) -> Result<JoinHandle<()>, OutputError> {
        let handle = ThreadBuilder::new()
            .name("playback-producer".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(&mut self) {
        let link = self.player.output_link();

        while self.running.load(Ordering::Acquire) {
            if link.is_corked() || self.producer.slots() < self.buffer.len() {
                sleep(PRODUCER_IDLE);
                continue;
            }

            match self.player.fill(&mut self.buffer, PERIOD_FRAMES) {
                Ok(FillOutcome::Filled) => self.push(PERIOD_FRAMES),
                Ok(FillOutcome::Exhausted { frames_written }) => {
                    self.push(frames_written);
                    self.drain(&link);
                    link.set_corked(true);
                    info!("Playlist exhausted");
                    self.player.notify(PlayerEvent::Exhausted);
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Playback failed");
                    link.set_corked(true);
                    self.player.notify(PlayerEvent::Fatal(e.to_string()));
                    return;
                }
            }
        }
        debug!("Producer stopped");
    }

    fn push(&mut self, frames: usize) {
        let samples = &self.buffer[..frames * OUTPUT_CHANNELS];
        match self.producer.write_chunk_uninit(samples.len()) {
            Ok(chunk) => {
                let pushed = chunk.fill_from_iter(samples.iter().copied());
                debug_assert_eq!(pushed, samples.len());
            }
            Err(e) => warn!(error = %e, "Ring buffer overflow, dropping audio"),
        }
    }

    /// Waits until the renderer has consumed everything pushed so far.
    fn drain(&self, link: &OutputLink) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.producer.slots() < self.producer.buffer().capacity()
            && !link.is_corked()
            && self.running.load(Ordering::Acquire)
            && Instant::now() < deadline
        {
            sleep(PRODUCER_IDLE);
        }
    }
}
