//! Shared player state with event notifications.
//!
//! The [`Player`] owns the playlist, the engine-scope gain and the flags the
//! output stream reads. It is shared between the producer thread and every
//! control surface behind one mutex; [`SharedPlayer`] wraps that mutex and
//! broadcasts [`PlayerEvent`]s after state changes.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    num_traits::cast::ToPrimitive,
    parking_lot::{Mutex, MutexGuard},
    serde::{Deserialize, Serialize},
    tokio::sync::broadcast::{Receiver, Sender, channel},
    tracing::debug,
};

use crate::audio::{
    engine::{EngineError, EngineGain, FillOutcome, fill},
    playlist::{LoopStatus, PlayMode, Playlist},
    track::{GainReference, MIN_GAIN_DB, TrackMeta, gain_scale},
};

/// Object path prefix of track identifiers.
pub const TRACK_ID_PREFIX: &str = "/org/mpris/MediaPlayer2/track/";

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Builds the identifier of the track at `index`.
#[must_use]
pub fn track_id(index: usize) -> String {
    format!("{TRACK_ID_PREFIX}{index}")
}

/// Converts seconds to whole microseconds. Non-finite input yields zero.
#[must_use]
pub fn seconds_to_us(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round().to_i64().unwrap_or(0)
}

/// Transport status derived from the output and the playlist position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// The output is running.
    Playing,
    /// The output is corked somewhere inside the playlist.
    Paused,
    /// The output is corked at the very start of the playlist.
    Stopped,
}

/// Flags shared between the player and the output callback.
#[derive(Debug, Default)]
pub struct OutputLink {
    corked: AtomicBool,
    flush: AtomicBool,
}

impl OutputLink {
    /// Whether the output plays silence instead of buffered audio.
    #[must_use]
    pub fn is_corked(&self) -> bool {
        self.corked.load(Ordering::Acquire)
    }

    /// Corks or uncorks the output.
    pub fn set_corked(&self, corked: bool) {
        self.corked.store(corked, Ordering::Release);
    }

    /// Asks the output to drop buffered audio before its next period.
    pub fn request_flush(&self) {
        self.flush.store(true, Ordering::Release);
    }

    /// Clears and returns the pending flush request.
    pub fn take_flush(&self) -> bool {
        self.flush.swap(false, Ordering::AcqRel)
    }
}

/// Description of the current track for control surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    /// Track identifier, see [`track_id`].
    pub track_id: String,
    /// Playlist index.
    pub index: usize,
    /// Length in microseconds.
    pub length_us: i64,
    /// Track metadata.
    pub meta: TrackMeta,
}

/// Notifications broadcast after player state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The transport status changed.
    PlaybackStatusChanged(PlaybackStatus),
    /// A different track became current.
    MetadataChanged(Option<NowPlaying>),
    /// The position jumped, in microseconds.
    Seeked(i64),
    /// The engine gain changed, as a linear volume.
    VolumeChanged(f64),
    /// The loop setting changed.
    LoopStatusChanged(LoopStatus),
    /// The play mode changed.
    PlayModeChanged(PlayMode),
    /// The gain reference changed.
    GainReferenceChanged(GainReference),
    /// The playlist was played to its end and the output has drained.
    Exhausted,
    /// Playback stopped on an unrecoverable error.
    Fatal(String),
}

/// Player state guarded by the shared mutex.
pub struct Player {
    playlist: Playlist,
    gain: EngineGain,
    output: Arc<OutputLink>,
}

impl Player {
    /// Creates a player.
    ///
    /// # Arguments
    ///
    /// * `playlist` - Tracks to play.
    /// * `gain` - Initial engine-scope gain.
    ///
    /// # Returns
    ///
    /// A new uncorked `Player`.
    #[must_use]
    pub fn new(playlist: Playlist, gain: EngineGain) -> Self {
        Self {
            playlist,
            gain: EngineGain {
                gain_db: gain.gain_db.max(MIN_GAIN_DB),
                ..gain
            },
            output: Arc::new(OutputLink::default()),
        }
    }

    /// The playlist.
    #[must_use]
    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    /// The playlist, mutably.
    pub fn playlist_mut(&mut self) -> &mut Playlist {
        &mut self.playlist
    }

    /// Engine-scope gain.
    #[must_use]
    pub fn gain(&self) -> EngineGain {
        self.gain
    }

    /// Sets the engine gain in dB, floored at [`MIN_GAIN_DB`].
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain.gain_db = if gain_db.is_nan() {
            MIN_GAIN_DB
        } else {
            gain_db.max(MIN_GAIN_DB)
        };
    }

    /// Selects the loudness correction applied to every track.
    pub fn set_gain_reference(&mut self, reference: GainReference) {
        self.gain.reference = reference;
    }

    /// Engine gain as a linear volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        f64::from(gain_scale(self.gain.gain_db))
    }

    /// Flags shared with the output stream.
    #[must_use]
    pub fn output_link(&self) -> Arc<OutputLink> {
        Arc::clone(&self.output)
    }

    /// Whether the output is corked.
    #[must_use]
    pub fn is_corked(&self) -> bool {
        self.output.is_corked()
    }

    /// Corks or uncorks the output.
    pub fn set_corked(&mut self, corked: bool) {
        self.output.set_corked(corked);
    }

    /// Drops audio already buffered for the output.
    pub fn flush_output(&self) {
        self.output.request_flush();
    }

    /// Position of the current track in seconds.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.playlist
            .current()
            .map_or(0.0, |track| track.state().position)
    }

    /// Position of the current track in microseconds.
    #[must_use]
    pub fn position_us(&self) -> i64 {
        seconds_to_us(self.position())
    }

    /// Derives the transport status.
    ///
    /// # Returns
    ///
    /// `Playing` while uncorked, `Stopped` when corked on the first track at
    /// position zero, `Paused` otherwise.
    #[must_use]
    pub fn playback_status(&self) -> PlaybackStatus {
        if !self.is_corked() {
            PlaybackStatus::Playing
        } else if self.playlist.index() == 0 && self.position() == 0.0 {
            PlaybackStatus::Stopped
        } else {
            PlaybackStatus::Paused
        }
    }

    /// Describes the current track.
    #[must_use]
    pub fn now_playing(&self) -> Option<NowPlaying> {
        let index = self.playlist.index();
        self.playlist.current().map(|track| {
            let meta = track.metadata().clone();
            NowPlaying {
                track_id: track_id(index),
                index,
                length_us: seconds_to_us(meta.duration),
                meta,
            }
        })
    }

    /// Fills an output buffer with the current engine gain.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the current track fails to decode.
    pub fn fill(&mut self, out: &mut [f32], frames: usize) -> Result<FillOutcome, EngineError> {
        fill(&mut self.playlist, self.gain, out, frames)
    }
}

/// Cloneable handle to the player shared by every thread.
#[derive(Clone)]
pub struct SharedPlayer {
    inner: Arc<Mutex<Player>>,
    output: Arc<OutputLink>,
    events: Sender<PlayerEvent>,
}

impl SharedPlayer {
    /// Wraps a player for sharing.
    #[must_use]
    pub fn new(player: Player) -> Self {
        let (events, _) = channel(EVENT_CAPACITY);
        let output = player.output_link();
        Self {
            inner: Arc::new(Mutex::new(player)),
            output,
            events,
        }
    }

    /// Locks the player.
    pub fn lock(&self) -> MutexGuard<'_, Player> {
        self.inner.lock()
    }

    /// Flags shared with the output stream, readable without the lock.
    #[must_use]
    pub fn output_link(&self) -> Arc<OutputLink> {
        Arc::clone(&self.output)
    }

    /// Subscribes to player events.
    ///
    /// # Returns
    ///
    /// A broadcast receiver for player events.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Broadcasts an event. Events without subscribers are dropped.
    pub fn notify(&self, event: PlayerEvent) {
        debug!(?event, "Player event");
        let _ = self.events.send(event);
    }

    /// Current transport status.
    #[must_use]
    pub fn playback_status(&self) -> PlaybackStatus {
        self.lock().playback_status()
    }

    /// Fills an output buffer under the lock.
    ///
    /// Announces the current track when the fill started it, including a
    /// track that restarts itself.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the current track fails to decode.
    pub fn fill(&self, out: &mut [f32], frames: usize) -> Result<FillOutcome, EngineError> {
        let (outcome, changed) = {
            let mut player = self.lock();
            let before = player.playlist().starts();
            let outcome = player.fill(out, frames);
            let changed = (player.playlist().starts() != before).then(|| player.now_playing());
            (outcome, changed)
        };

        if let Some(now_playing) = changed {
            self.notify(PlayerEvent::MetadataChanged(now_playing));
        }
        outcome
    }
}
