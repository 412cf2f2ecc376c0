//! User preferences and engine tuning.

pub mod settings;

pub use settings::{EngineSettings, SettingsError, SettingsManager, UserSettings, get_config_path};
