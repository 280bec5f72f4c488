//! Player preferences with XDG Base Directory compliance.
//!
//! Preferences are stored as JSON under `$XDG_CONFIG_HOME/poppy`. Command
//! line options override them for one run without being written back.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::{Path, PathBuf},
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::audio::{
    playlist::PlayMode,
    track::{GainReference, MIN_GAIN_DB},
};

/// Shortest accepted output buffer.
const MIN_BUFFER_MS: u32 = 10;

/// Longest accepted output buffer.
const MAX_BUFFER_MS: u32 = 5000;

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable player preferences with default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Play mode at startup.
    pub play_mode: PlayMode,
    /// Engine gain in dB.
    pub gain_db: f32,
    /// Loudness correction added to the gain.
    pub gain_reference: GainReference,
    /// Output ring buffer length in milliseconds.
    pub buffer_ms: u32,
    /// Audio output device name, the host default when unset.
    pub audio_device: Option<String>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            play_mode: PlayMode::Sequential,
            gain_db: 0.0,
            gain_reference: GainReference::Header,
            buffer_ms: 200,
            audio_device: None,
        }
    }
}

impl PlayerSettings {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` for a non-finite or too low gain
    /// or a buffer length outside 10 to 5000 ms.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.gain_db.is_finite() || self.gain_db < MIN_GAIN_DB {
            return Err(SettingsError::InvalidValue {
                reason: format!("gain {} dB is below {MIN_GAIN_DB} dB", self.gain_db),
            });
        }
        if !(MIN_BUFFER_MS..=MAX_BUFFER_MS).contains(&self.buffer_ms) {
            return Err(SettingsError::InvalidValue {
                reason: format!(
                    "buffer of {} ms is outside {MIN_BUFFER_MS}..={MAX_BUFFER_MS} ms",
                    self.buffer_ms
                ),
            });
        }
        Ok(())
    }
}

/// Handles loading, saving, and validation of player preferences.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe settings storage.
    settings: RwLock<PlayerSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl SettingsManager {
    /// Creates a settings manager reading the default config path.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `SettingsManager` or a `SettingsError`.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a settings manager with a custom config path.
    ///
    /// A missing file yields the defaults; nothing is written until the
    /// settings are updated.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path of the settings file
    ///
    /// # Returns
    ///
    /// A `Result` containing the `SettingsManager` or a `SettingsError`.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file exists but cannot be read, parsed
    /// or validated.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        let settings = if config_path.exists() {
            debug!(path = ?config_path, "Loading settings");
            let settings: PlayerSettings = from_str(&read_to_string(&config_path)?)?;
            settings.validate()?;
            settings
        } else {
            debug!(path = ?config_path, "No settings file, using defaults");
            PlayerSettings::default()
        };

        Ok(Self {
            settings: RwLock::new(settings),
            config_path,
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, PlayerSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    /// Validates, applies and saves new settings.
    ///
    /// # Arguments
    ///
    /// * `new_settings` - New settings to apply.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the settings are invalid or cannot be
    /// saved to disk.
    pub fn update_settings(&self, new_settings: PlayerSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;
        *self.settings.write() = new_settings;
        self.save_settings()
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!(path = ?self.config_path, "Saving settings");
        if let Some(parent) = self.config_path.parent() {
            create_dir_all(parent)?;
        }
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Path of the settings file.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("poppy");
    config_dir.push("settings.json");
    config_dir
}

/// Gets the XDG config home directory.
///
/// Uses `XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
fn get_xdg_config_home() -> PathBuf {
    if let Ok(config_home) = var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return PathBuf::from(config_home);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(".config");
        return path;
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use std::fs::write;

    use {
        serde_json::{from_str, to_string},
        tempfile::tempdir,
    };

    use crate::{
        audio::{playlist::PlayMode, track::GainReference},
        config::settings::{PlayerSettings, SettingsError, SettingsManager},
    };

    #[test]
    fn test_player_settings_default() {
        let settings = PlayerSettings::default();
        assert_eq!(settings.play_mode, PlayMode::Sequential);
        assert_eq!(settings.gain_db, 0.0);
        assert_eq!(settings.gain_reference, GainReference::Header);
        assert_eq!(settings.buffer_ms, 200);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_player_settings_serialization() {
        let settings = PlayerSettings {
            play_mode: PlayMode::RepeatOne,
            gain_db: -3.5,
            gain_reference: GainReference::Album,
            buffer_ms: 100,
            audio_device: Some("Test Device".to_string()),
        };

        let serialized = to_string(&settings).unwrap();
        assert!(serialized.contains("\"repeat-one\""));
        assert!(serialized.contains("\"album\""));
        let deserialized: PlayerSettings = from_str(&serialized).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: PlayerSettings = from_str(r#"{"gain_db": -6.0}"#).unwrap();
        assert_eq!(settings.gain_db, -6.0);
        assert_eq!(settings.buffer_ms, 200);
    }

    #[test]
    fn test_manager_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let manager = SettingsManager::with_config_path(path.clone()).unwrap();
        assert_eq!(*manager.get_settings(), PlayerSettings::default());
        assert!(!path.exists());

        let updated = PlayerSettings {
            play_mode: PlayMode::RepeatAll,
            ..PlayerSettings::default()
        };
        manager.update_settings(updated.clone()).unwrap();
        assert!(path.exists());

        let reloaded = SettingsManager::with_config_path(path).unwrap();
        assert_eq!(*reloaded.get_settings(), updated);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write(&path, r#"{"buffer_ms": 1}"#).unwrap();
        assert!(matches!(
            SettingsManager::with_config_path(path),
            Err(SettingsError::InvalidValue { .. })
        ));

        let settings = PlayerSettings {
            gain_db: f32::NAN,
            ..PlayerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_error_display() {
        let invalid_value_error = SettingsError::InvalidValue {
            reason: "test reason".to_string(),
        };
        assert_eq!(
            invalid_value_error.to_string(),
            "Invalid settings value: test reason"
        );
    }
}
