//! Transport control plane.
//!
//! [`Transport`] exposes the remote-control operations (play, pause, seek,
//! volume, loop status and friends). Each one takes the player lock once,
//! applies its change and broadcasts the resulting events after releasing
//! it. [`ControlQueue`] runs the same operations from a worker thread for
//! callers that must not block, such as the interactive command reader.

use std::{
    str::FromStr,
    thread::{Builder as ThreadBuilder, JoinHandle},
};

use {
    async_channel::{Receiver, Sender, unbounded},
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::{
    audio::{
        playlist::{LoopStatus, PlayMode, Skip},
        track::{GainReference, MIN_GAIN_DB, TrackError, Whence},
    },
    state::player_state::{
        NowPlaying, PlaybackStatus, Player, PlayerEvent, SharedPlayer, track_id,
    },
};

/// Error type for control operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The playlist is empty.
    #[error("No tracks loaded")]
    NoTracks,
    /// A position change named a track that is not current.
    #[error("Track {requested} is not the current track {current}")]
    TrackMismatch { requested: String, current: String },
    /// The current track could not seek.
    #[error("Seek failed: {0}")]
    SeekFailed(#[from] TrackError),
    /// The control worker has stopped.
    #[error("Control queue is closed")]
    QueueClosed,
    /// A command line could not be parsed.
    #[error("Invalid command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },
}

/// A control action queued for the worker thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    /// Seek the current track by a signed number of seconds.
    SeekBy(f64),
    /// Move through the playlist by a signed number of tracks.
    SkipLinks(i64),
    /// Add to the engine gain, in dB.
    GainDelta(f32),
    /// Replace the engine gain, in dB.
    AbsoluteGain(f32),
    /// Select the loudness correction.
    GainReference(GainReference),
    /// Change the play mode.
    PlayMode(PlayMode),
    /// Toggle between playing and paused.
    TogglePause,
    /// Stop and return to the first track.
    Stop,
}

/// A parsed interactive command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Queue a control request.
    Control(ControlRequest),
    /// Leave the player.
    Quit,
}

fn parse_number<T: FromStr>(command: &str, value: Option<&str>) -> Result<T, ControlError> {
    let invalid = |reason: &str| ControlError::InvalidCommand {
        command: command.to_string(),
        reason: reason.to_string(),
    };
    let value = value.ok_or_else(|| invalid("missing argument"))?;
    value
        .trim_start_matches('+')
        .parse()
        .map_err(|_| invalid("not a number"))
}

/// Parses one line of the interactive command language.
///
/// Commands: `seek ±S`, `skip ±N`, `gain ±DB`, `gain =DB`, `ref KIND`,
/// `mode MODE`, `pause`, `stop`, `next`, `prev`, `quit`.
///
/// # Returns
///
/// `None` for blank lines.
///
/// # Errors
///
/// Returns `ControlError::InvalidCommand` for unknown commands or bad
/// arguments.
pub fn parse_command(line: &str) -> Result<Option<Command>, ControlError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    let line = line.trim();

    let invalid = |reason: &str| ControlError::InvalidCommand {
        command: line.to_string(),
        reason: reason.to_string(),
    };

    let request = match verb.to_ascii_lowercase().as_str() {
        "seek" => ControlRequest::SeekBy(parse_number(line, argument)?),
        "skip" => ControlRequest::SkipLinks(parse_number(line, argument)?),
        "next" => ControlRequest::SkipLinks(1),
        "prev" | "previous" => ControlRequest::SkipLinks(-1),
        "gain" => match argument.and_then(|a| a.strip_prefix('=')) {
            Some(absolute) => ControlRequest::AbsoluteGain(parse_number(line, Some(absolute))?),
            None => ControlRequest::GainDelta(parse_number(line, argument)?),
        },
        "ref" | "reference" => ControlRequest::GainReference(
            argument
                .and_then(|a| a.parse().ok())
                .ok_or_else(|| invalid("expected header, album, track or absolute"))?,
        ),
        "mode" => ControlRequest::PlayMode(
            argument
                .ok_or_else(|| invalid("missing argument"))?
                .parse()
                .map_err(|e: String| invalid(&e))?,
        ),
        "pause" | "p" => ControlRequest::TogglePause,
        "stop" => ControlRequest::Stop,
        "quit" | "q" => return Ok(Some(Command::Quit)),
        _ => return Err(invalid("unknown command")),
    };

    Ok(Some(Command::Control(request)))
}

/// Converts a linear volume to a gain in dB.
#[must_use]
pub fn volume_to_db(volume: f64) -> f32 {
    if volume.is_nan() || volume <= 0.0 {
        return MIN_GAIN_DB;
    }
    ((20.0 * volume.log10()) as f32).max(MIN_GAIN_DB)
}

/// Seeks the current track of a locked player.
fn seek_locked(player: &mut Player, offset: f64, whence: Whence) -> Result<i64, ControlError> {
    let track = player
        .playlist_mut()
        .current_mut()
        .ok_or(ControlError::NoTracks)?;
    track.seek(offset, whence)?;
    player.flush_output();
    Ok(player.position_us())
}

/// Moves a locked player to `position` seconds if `track` is still current.
fn seek_if_current(player: &mut Player, track: &str, position: f64) -> Result<i64, ControlError> {
    if player.playlist().is_empty() {
        return Err(ControlError::NoTracks);
    }
    let current = track_id(player.playlist().index());
    if current != track {
        return Err(ControlError::TrackMismatch {
            requested: track.to_string(),
            current,
        });
    }
    seek_locked(player, position, Whence::Set)
}

/// Remote-control operations on the shared player.
#[derive(Clone)]
pub struct Transport {
    player: SharedPlayer,
}

impl Transport {
    /// Creates a transport for a shared player.
    #[must_use]
    pub fn new(player: SharedPlayer) -> Self {
        Self { player }
    }

    /// The shared player.
    #[must_use]
    pub fn player(&self) -> &SharedPlayer {
        &self.player
    }

    fn emit(&self, events: Vec<PlayerEvent>) {
        for event in events {
            self.player.notify(event);
        }
    }

    /// Sets the cork state computed from the current one under one guard.
    fn update_cork(&self, cork: impl FnOnce(bool) -> bool) -> Result<(), ControlError> {
        let status = {
            let mut player = self.player.lock();
            if player.playlist().is_empty() {
                return Err(ControlError::NoTracks);
            }
            let corked = cork(player.is_corked());
            player.set_corked(corked);
            player.playback_status()
        };
        self.emit(vec![PlayerEvent::PlaybackStatusChanged(status)]);
        Ok(())
    }

    /// Uncorks the output.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn play(&self) -> Result<(), ControlError> {
        self.update_cork(|_| false)
    }

    /// Corks the output.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn pause(&self) -> Result<(), ControlError> {
        self.update_cork(|_| true)
    }

    /// Toggles between playing and paused.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn play_pause(&self) -> Result<(), ControlError> {
        self.update_cork(|corked| !corked)
    }

    /// Rewinds to the start of the first track and corks the output.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn stop(&self) -> Result<(), ControlError> {
        let events = {
            let mut player = self.player.lock();
            if player.playlist().is_empty() {
                return Err(ControlError::NoTracks);
            }
            let before = player.playlist().index();
            player.playlist_mut().rewind();
            player.set_corked(true);
            player.flush_output();

            let mut events = vec![
                PlayerEvent::PlaybackStatusChanged(player.playback_status()),
                PlayerEvent::Seeked(0),
            ];
            if before != player.playlist().index() {
                events.push(PlayerEvent::MetadataChanged(player.now_playing()));
            }
            events
        };
        self.emit(events);
        Ok(())
    }

    /// Moves through the playlist by `offset` tracks.
    ///
    /// Running past the last track outside repeat-all mode rewinds to the
    /// first track and corks the output.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn skip(&self, offset: i64) -> Result<Skip, ControlError> {
        let (skip, events) = {
            let mut player = self.player.lock();
            if player.playlist().is_empty() {
                return Err(ControlError::NoTracks);
            }
            let skip = player.playlist_mut().skip(offset);
            if skip == Skip::Stopped {
                player.set_corked(true);
            }
            player.flush_output();

            let events = vec![
                PlayerEvent::MetadataChanged(player.now_playing()),
                PlayerEvent::PlaybackStatusChanged(player.playback_status()),
            ];
            (skip, events)
        };
        self.emit(events);
        Ok(skip)
    }

    /// Moves to the next track.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn next(&self) -> Result<Skip, ControlError> {
        self.skip(1)
    }

    /// Moves to the previous track.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NoTracks` for an empty playlist.
    pub fn previous(&self) -> Result<Skip, ControlError> {
        self.skip(-1)
    }

    fn seek_current(&self, offset: f64, whence: Whence) -> Result<i64, ControlError> {
        let position = seek_locked(&mut self.player.lock(), offset, whence)?;
        self.emit(vec![PlayerEvent::Seeked(position)]);
        Ok(position)
    }

    /// Seeks the current track relative to its position.
    ///
    /// # Arguments
    ///
    /// * `offset_us` - Signed offset in microseconds.
    ///
    /// # Returns
    ///
    /// The new position in microseconds.
    ///
    /// # Errors
    ///
    /// Returns `ControlError` if there is no track or the seek fails.
    pub fn seek_by(&self, offset_us: i64) -> Result<i64, ControlError> {
        self.seek_current(offset_us as f64 / 1_000_000.0, Whence::Cur)
    }

    /// Seeks the current track by a signed number of seconds.
    ///
    /// # Errors
    ///
    /// Returns `ControlError` if there is no track or the seek fails.
    pub fn seek_seconds(&self, offset: f64) -> Result<i64, ControlError> {
        self.seek_current(offset, Whence::Cur)
    }

    /// Sets the absolute position of the current track.
    ///
    /// # Arguments
    ///
    /// * `track` - Identifier of the track the caller believes is current.
    /// * `position_us` - Target position in microseconds.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::TrackMismatch` when `track` is not current.
    pub fn set_position(&self, track: &str, position_us: i64) -> Result<i64, ControlError> {
        let position =
            seek_if_current(&mut self.player.lock(), track, position_us as f64 / 1_000_000.0)?;
        self.emit(vec![PlayerEvent::Seeked(position)]);
        Ok(position)
    }

    /// Engine gain as a linear volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.player.lock().volume()
    }

    fn update_gain(&self, update: impl FnOnce(&mut Player)) -> f64 {
        let volume = {
            let mut player = self.player.lock();
            update(&mut player);
            player.volume()
        };
        debug!(volume, "Gain changed");
        self.emit(vec![PlayerEvent::VolumeChanged(volume)]);
        volume
    }

    /// Sets the engine gain from a linear volume.
    ///
    /// Zero or negative volumes select the gain floor.
    pub fn set_volume(&self, volume: f64) -> f64 {
        self.update_gain(|player| player.set_gain_db(volume_to_db(volume)))
    }

    /// Replaces the engine gain, in dB.
    pub fn set_gain(&self, gain_db: f32) -> f64 {
        self.update_gain(|player| player.set_gain_db(gain_db))
    }

    /// Adds to the engine gain, in dB.
    pub fn adjust_gain(&self, delta_db: f32) -> f64 {
        self.update_gain(|player| {
            let gain_db = player.gain().gain_db + delta_db;
            player.set_gain_db(gain_db);
        })
    }

    /// Selects the loudness correction.
    pub fn set_gain_reference(&self, reference: GainReference) {
        self.player.lock().set_gain_reference(reference);
        self.emit(vec![PlayerEvent::GainReferenceChanged(reference)]);
    }

    /// Loop setting derived from the play mode.
    #[must_use]
    pub fn loop_status(&self) -> LoopStatus {
        self.player.lock().playlist().mode().into()
    }

    /// Sets the play mode from a loop setting.
    pub fn set_loop_status(&self, status: LoopStatus) {
        self.set_play_mode(status.into());
    }

    /// Sets the play mode.
    pub fn set_play_mode(&self, mode: PlayMode) {
        self.player.lock().playlist_mut().set_mode(mode);
        self.emit(vec![
            PlayerEvent::PlayModeChanged(mode),
            PlayerEvent::LoopStatusChanged(mode.into()),
        ]);
    }

    /// Current transport status.
    #[must_use]
    pub fn playback_status(&self) -> PlaybackStatus {
        self.player.playback_status()
    }

    /// Description of the current track.
    #[must_use]
    pub fn metadata(&self) -> Option<NowPlaying> {
        self.player.lock().now_playing()
    }

    /// Position of the current track in microseconds.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.player.lock().position_us()
    }

    /// Applies a queued request.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying operation.
    pub fn apply(&self, request: ControlRequest) -> Result<(), ControlError> {
        match request {
            ControlRequest::SeekBy(seconds) => self.seek_seconds(seconds).map(drop),
            ControlRequest::SkipLinks(offset) => self.skip(offset).map(drop),
            ControlRequest::GainDelta(delta) => {
                self.adjust_gain(delta);
                Ok(())
            }
            ControlRequest::AbsoluteGain(gain) => {
                self.set_gain(gain);
                Ok(())
            }
            ControlRequest::GainReference(reference) => {
                self.set_gain_reference(reference);
                Ok(())
            }
            ControlRequest::PlayMode(mode) => {
                self.set_play_mode(mode);
                Ok(())
            }
            ControlRequest::TogglePause => self.play_pause(),
            ControlRequest::Stop => self.stop(),
        }
    }
}

/// Worker thread applying control requests in order.
pub struct ControlQueue {
    tx: Sender<ControlRequest>,
    worker: Option<JoinHandle<()>>,
}

impl ControlQueue {
    /// Starts the worker.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread cannot be spawned.
    pub fn spawn(transport: Transport) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let worker = ThreadBuilder::new()
            .name("control".to_string())
            .spawn(move || Self::run(&transport, &rx))?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    fn run(transport: &Transport, rx: &Receiver<ControlRequest>) {
        while let Ok(request) = rx.recv_blocking() {
            debug!(?request, "Applying control request");
            if let Err(e) = transport.apply(request) {
                warn!(error = %e, ?request, "Control request failed");
            }
        }
        debug!("Control queue stopped");
    }

    /// Queues a request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::QueueClosed` after shutdown.
    pub fn submit(&self, request: ControlRequest) -> Result<(), ControlError> {
        self.tx
            .try_send(request)
            .map_err(|_| ControlError::QueueClosed)
    }

    /// Stops the worker after the queued requests were applied.
    pub fn shutdown(mut self) {
        self.tx.close();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Control worker panicked");
        }
    }
}
