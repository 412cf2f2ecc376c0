//! Library scanning: a recursive directory walk plus tag reading.

pub mod config;

use std::{
    fs::read_dir,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

pub use crate::library::scanner::config::ScannerConfig;

use crate::{audio::metadata::TagReader, error::LibraryError, library::models::Track};

/// Walks a directory tree and reads every matching file into a `Track`.
#[derive(Debug, Clone, Default)]
pub struct LibraryScanner {
    config: ScannerConfig,
}

impl LibraryScanner {
    /// Creates a scanner with the given configuration.
    #[must_use]
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Gets the scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Whether `path` has one of the configured extensions.
    #[must_use]
    pub fn is_supported_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }

    /// Scans `root` and returns its tracks in path order.
    ///
    /// Files whose tags cannot be read are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::ScanError` if `root` itself cannot be read.
    pub fn scan(&self, root: &Path) -> Result<Vec<Track>, LibraryError> {
        let files = self.collect_audio_files_from_directory(root)?;
        let mut tracks = Vec::with_capacity(files.len());

        for path in files {
            match TagReader::read_track(&path) {
                Ok(track) => tracks.push(track),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }

        info!(root = %root.display(), tracks = tracks.len(), "Library scanned");
        Ok(tracks)
    }

    /// Recursively collects audio files from a directory and its subdirectories.
    ///
    /// Entries are visited in name order. Unreadable subdirectories are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::ScanError` if `dir_path` cannot be read.
    pub fn collect_audio_files_from_directory(
        &self,
        dir_path: &Path,
    ) -> Result<Vec<PathBuf>, LibraryError> {
        let entries = read_dir(dir_path).map_err(|source| LibraryError::ScanError {
            path: dir_path.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();

        let mut audio_files = Vec::new();
        for path in paths {
            if path.is_file() {
                if self.is_supported_audio_file(&path) {
                    audio_files.push(path);
                }
            } else if path.is_dir() {
                match self.collect_audio_files_from_directory(&path) {
                    Ok(sub_audio_files) => audio_files.extend(sub_audio_files),
                    Err(e) => debug!(error = %e, "Skipping unreadable directory"),
                }
            }
        }

        Ok(audio_files)
    }
}
