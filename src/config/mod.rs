//! Player preferences and their persistence.
//!
//! This module provides preference management with XDG Base Directory
//! compliance.

pub mod settings;

pub use settings::{PlayerSettings, SettingsError, SettingsManager, get_config_path};
