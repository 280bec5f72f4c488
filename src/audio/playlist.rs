//! Ordered track list with play-mode driven advancement.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::audio::{
    demux::{DemuxError, open_tracks},
    track::{Track, Whence},
};

/// How the playlist advances when a track ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayMode {
    /// Play every track once, in order.
    #[default]
    Sequential,
    /// Wrap around to the first track after the last one.
    RepeatAll,
    /// Replay the current track forever.
    RepeatOne,
    /// Stop after the current track.
    Single,
}

impl Display for PlayMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            PlayMode::Sequential => "sequential",
            PlayMode::RepeatAll => "repeat-all",
            PlayMode::RepeatOne => "repeat-one",
            PlayMode::Single => "single",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "normal" => Ok(PlayMode::Sequential),
            "repeat-all" | "repeat" | "loop" => Ok(PlayMode::RepeatAll),
            "repeat-one" | "one" => Ok(PlayMode::RepeatOne),
            "single" => Ok(PlayMode::Single),
            other => Err(format!("unknown play mode: {other}")),
        }
    }
}

/// Loop setting as exposed to remote control surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopStatus {
    /// No repetition.
    None,
    /// Repeat the current track.
    Track,
    /// Repeat the whole playlist.
    Playlist,
}

impl From<PlayMode> for LoopStatus {
    fn from(mode: PlayMode) -> Self {
        match mode {
            PlayMode::Sequential | PlayMode::Single => LoopStatus::None,
            PlayMode::RepeatOne => LoopStatus::Track,
            PlayMode::RepeatAll => LoopStatus::Playlist,
        }
    }
}

impl From<LoopStatus> for PlayMode {
    fn from(status: LoopStatus) -> Self {
        match status {
            LoopStatus::None => PlayMode::Sequential,
            LoopStatus::Track => PlayMode::RepeatOne,
            LoopStatus::Playlist => PlayMode::RepeatAll,
        }
    }
}

/// Result of advancing past the end of the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Playback continues on the (possibly unchanged) current track.
    Continue,
    /// The play mode has nothing left to play.
    Exhausted,
}

/// Result of an explicit skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The current index moved within bounds.
    Moved,
    /// The index wrapped around the playlist.
    Wrapped,
    /// The skip ran past the last track; the index was reset to the first
    /// track and playback should stop.
    Stopped,
}

/// An ordered list of opened tracks.
pub struct Playlist {
    tracks: Vec<Box<dyn Track>>,
    current: usize,
    mode: PlayMode,
    /// Tracks started by end-of-track handovers.
    starts: u64,
}

impl Playlist {
    /// Creates a playlist positioned on its first track.
    ///
    /// # Arguments
    ///
    /// * `tracks` - The tracks, in playback order.
    /// * `mode` - Initial play mode.
    ///
    /// # Returns
    ///
    /// A new `Playlist`.
    #[must_use]
    pub fn new(tracks: Vec<Box<dyn Track>>, mode: PlayMode) -> Self {
        Self {
            tracks,
            current: 0,
            mode,
            starts: 0,
        }
    }

    /// Opens every playable stream of every file, in argument order.
    ///
    /// Files that cannot be opened are logged and left out; a chained file
    /// contributes one entry per link.
    ///
    /// # Arguments
    ///
    /// * `paths` - Files to open.
    /// * `mode` - Initial play mode.
    ///
    /// # Returns
    ///
    /// The playlist and the files that were left out with their errors.
    pub fn from_paths<I, P>(paths: I, mode: PlayMode) -> (Self, Vec<(PathBuf, DemuxError)>)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut tracks = Vec::new();
        let mut failures = Vec::new();

        for path in paths {
            let path = path.as_ref();
            match open_tracks(path) {
                Ok(opened) => {
                    debug!(path = %path.display(), tracks = opened.len(), "Opened file");
                    tracks.extend(opened);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unplayable file");
                    failures.push((path.to_path_buf(), e));
                }
            }
        }

        info!(tracks = tracks.len(), %mode, "Playlist ready");
        (Self::new(tracks, mode), failures)
    }

    /// Number of times playback continued on a track after another one ended.
    ///
    /// Counts repeat-one restarts as well as moves to a different track.
    #[must_use]
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the playlist holds no track.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Index of the current track.
    #[must_use]
    pub fn index(&self) -> usize {
        self.current
    }

    /// Active play mode.
    #[must_use]
    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    /// Changes the play mode. The current index is kept.
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    /// The current track.
    #[must_use]
    pub fn current(&self) -> Option<&dyn Track> {
        self.tracks.get(self.current).map(|track| &**track)
    }

    /// The current track, mutably.
    pub fn current_mut(&mut self) -> Option<&mut (dyn Track + 'static)> {
        self.tracks.get_mut(self.current).map(|track| &mut **track)
    }

    /// Every track, in playback order.
    pub fn tracks(&self) -> impl Iterator<Item = &dyn Track> {
        self.tracks.iter().map(|track| &**track)
    }

    /// Handles the end of the current track.
    ///
    /// The finished track is rewound first so it can be replayed later.
    ///
    /// # Returns
    ///
    /// `Advance::Exhausted` when the play mode has nothing left to play. The
    /// index is left on the finished track in that case.
    pub fn on_end_of_track(&mut self) -> Advance {
        if self.tracks.is_empty() {
            return Advance::Exhausted;
        }
        self.rewind_current();

        let advance = match self.mode {
            PlayMode::Sequential if self.current + 1 < self.tracks.len() => {
                self.current += 1;
                Advance::Continue
            }
            PlayMode::Sequential | PlayMode::Single => Advance::Exhausted,
            PlayMode::RepeatAll => {
                self.current = (self.current + 1) % self.tracks.len();
                Advance::Continue
            }
            PlayMode::RepeatOne => Advance::Continue,
        };

        if advance == Advance::Continue {
            self.starts += 1;
        }
        debug!(index = self.current, mode = %self.mode, ?advance, "Track ended");
        advance
    }

    /// Moves to the next track.
    pub fn next_track(&mut self) -> Skip {
        self.skip(1)
    }

    /// Moves to the previous track.
    pub fn previous_track(&mut self) -> Skip {
        self.skip(-1)
    }

    /// Moves the current index by `offset` tracks.
    ///
    /// The track being left is rewound. In repeat-all mode the index wraps
    /// in both directions. Otherwise moving before the first track clamps to
    /// it, and moving past the last track resets to the first track and
    /// reports `Skip::Stopped`.
    ///
    /// # Arguments
    ///
    /// * `offset` - Signed number of tracks to move.
    ///
    /// # Returns
    ///
    /// How the index moved.
    pub fn skip(&mut self, offset: i64) -> Skip {
        if self.tracks.is_empty() {
            return Skip::Stopped;
        }
        self.rewind_current();

        let len = self.tracks.len() as i64;
        let target = self.current as i64 + offset;

        let skip = if self.mode == PlayMode::RepeatAll {
            self.current = target.rem_euclid(len) as usize;
            if (0..len).contains(&target) {
                Skip::Moved
            } else {
                Skip::Wrapped
            }
        } else if target >= len {
            self.current = 0;
            Skip::Stopped
        } else {
            self.current = target.max(0) as usize;
            Skip::Moved
        };

        // The entered track always starts from its beginning.
        self.rewind_current();
        debug!(offset, index = self.current, ?skip, "Skipped");
        skip
    }

    /// Rewinds the current track and returns to the first one.
    pub fn rewind(&mut self) {
        self.rewind_current();
        self.current = 0;
        self.rewind_current();
    }

    fn rewind_current(&mut self) {
        if let Some(track) = self.current_mut()
            && let Err(e) = track.seek(0.0, Whence::Set)
        {
            warn!(error = %e, "Failed to rewind track");
        }
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        for track in &mut self.tracks {
            track.close();
        }
    }
}
