//! User preference management with XDG Base Directory compliance.
//!
//! Only preferences live here: the preferred output device, the library
//! location and the engine tuning knobs. Playback state (queue, position,
//! repeat/shuffle) is never written to disk.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::PathBuf,
    time::Duration,
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

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

/// Tuning of the streaming engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Blocks buffered before the output stream is started.
    pub prefill_blocks: usize,
    /// Blocks per second of audio; block size is `samplerate / blocks_per_second`.
    pub blocks_per_second: u32,
    /// Capacity of the sample ring buffer, in blocks. Must exceed `prefill_blocks`.
    pub ring_blocks: usize,
    /// Request exclusive mode on host APIs that support it.
    pub exclusive_mode: bool,
    /// Period of the controller watcher in milliseconds.
    pub watch_interval_ms: u64,
    /// Longest time `play` waits for the prefill gate, in milliseconds.
    pub prefill_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prefill_blocks: 20,
            blocks_per_second: 8,
            ring_blocks: 40,
            exclusive_mode: true,
            watch_interval_ms: 1000,
            prefill_timeout_ms: 10_000,
        }
    }
}

impl EngineSettings {
    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.blocks_per_second == 0 {
            return Err(SettingsError::InvalidValue {
                reason: "blocks_per_second must be greater than 0".to_string(),
            });
        }
        if self.prefill_blocks == 0 {
            return Err(SettingsError::InvalidValue {
                reason: "prefill_blocks must be greater than 0".to_string(),
            });
        }
        if self.ring_blocks <= self.prefill_blocks {
            return Err(SettingsError::InvalidValue {
                reason: format!(
                    "ring_blocks ({}) must exceed prefill_blocks ({})",
                    self.ring_blocks, self.prefill_blocks
                ),
            });
        }
        if self.watch_interval_ms == 0 {
            return Err(SettingsError::InvalidValue {
                reason: "watch_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Watcher period as a `Duration`.
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// Prefill wait limit as a `Duration`.
    #[must_use]
    pub fn prefill_timeout(&self) -> Duration {
        Duration::from_millis(self.prefill_timeout_ms)
    }
}

/// Serializable user settings structure with default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Host API of the preferred output device.
    pub host_api: Option<String>,
    /// Preferred output device name (substring match).
    pub audio_device: Option<String>,
    /// Music library directory.
    pub library_directory: Option<String>,
    /// File extensions picked up by the library scan (lowercase, no dot).
    pub library_extensions: Vec<String>,
    /// Streaming engine tuning.
    pub engine: EngineSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            host_api: None,
            audio_device: None,
            library_directory: None,
            library_extensions: vec!["flac".to_string()],
            engine: EngineSettings::default(),
        }
    }
}

/// Handles loading, saving, and validation of user preferences.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe user settings storage.
    settings: RwLock<UserSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl SettingsManager {
    /// Creates a new settings manager with default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file exists but cannot be read, parsed
    /// or fails validation.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        if let Some(parent) = config_path.parent() {
            create_dir_all(parent)?;
        }

        let settings: UserSettings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            let contents = read_to_string(&config_path)?;
            from_str(&contents)?
        } else {
            debug!("No settings file at {:?}, using defaults", config_path);
            UserSettings::default()
        };
        settings.engine.validate()?;

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Replaces the settings and saves them to disk.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the new settings are invalid or cannot be saved.
    pub fn update_settings(&self, new_settings: UserSettings) -> Result<(), SettingsError> {
        new_settings.engine.validate()?;
        *self.settings.write() = new_settings;
        self.save_settings()
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Path of the settings file under the XDG config home.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("handcrafted-player");
    config_dir.push("settings.json");
    config_dir
}

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

    use crate::config::settings::{EngineSettings, SettingsError, SettingsManager, UserSettings};

    #[test]
    fn test_user_settings_default() {
        let settings = UserSettings::default();
        assert_eq!(settings.library_extensions, vec!["flac".to_string()]);
        assert_eq!(settings.engine.prefill_blocks, 20);
        assert_eq!(settings.engine.blocks_per_second, 8);
        assert!(settings.engine.exclusive_mode);
        assert_eq!(settings.engine.watch_interval_ms, 1000);
    }

    #[test]
    fn test_user_settings_serialization() {
        let settings = UserSettings {
            host_api: Some("ALSA".to_string()),
            audio_device: Some("USB DAC".to_string()),
            library_directory: Some("/music".to_string()),
            library_extensions: vec!["flac".to_string(), "wav".to_string()],
            engine: EngineSettings {
                exclusive_mode: false,
                ..EngineSettings::default()
            },
        };

        let serialized = to_string(&settings).unwrap();
        let deserialized: UserSettings = from_str(&serialized).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_partial_settings_file_uses_defaults() {
        let parsed: UserSettings = from_str(r#"{"audio_device":"Speakers"}"#).unwrap();
        assert_eq!(parsed.audio_device.as_deref(), Some("Speakers"));
        assert_eq!(parsed.engine, EngineSettings::default());
    }

    #[test]
    fn test_engine_settings_validation() {
        assert!(EngineSettings::default().validate().is_ok());

        let too_small_ring = EngineSettings {
            ring_blocks: 20,
            ..EngineSettings::default()
        };
        assert!(matches!(
            too_small_ring.validate(),
            Err(SettingsError::InvalidValue { .. })
        ));

        let zero_rate = EngineSettings {
            blocks_per_second: 0,
            ..EngineSettings::default()
        };
        assert!(zero_rate.validate().is_err());
    }

    #[test]
    fn test_settings_manager_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let manager = SettingsManager::with_config_path(path.clone()).unwrap();
        assert_eq!(*manager.get_settings(), UserSettings::default());

        let mut updated = UserSettings::default();
        updated.library_directory = Some("/srv/music".to_string());
        manager.update_settings(updated.clone()).unwrap();

        let reloaded = SettingsManager::with_config_path(path).unwrap();
        assert_eq!(*reloaded.get_settings(), updated);
    }

    #[test]
    fn test_invalid_settings_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write(&path, r#"{"engine":{"prefill_blocks":0}}"#).unwrap();

        assert!(SettingsManager::with_config_path(path).is_err());
    }
}
