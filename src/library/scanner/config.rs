//! Configuration for library scanning behavior.

use crate::config::UserSettings;

/// Configuration for library scanning behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// File extensions to pick up, lowercase and without the dot.
    pub extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["flac".to_string()],
        }
    }
}

impl ScannerConfig {
    /// Scanner configuration from the user's settings.
    #[must_use]
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            extensions: settings
                .library_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }
}
