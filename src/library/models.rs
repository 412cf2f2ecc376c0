//! Data models for the music library.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

/// Represents a track in the library.
///
/// The path is the track's identity; two tracks with the same path are the
/// same track regardless of their tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Track {
    /// File system path to the audio file.
    pub path: PathBuf,
    /// Track title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Album name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Track artist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Album artist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    /// Duration in seconds.
    pub duration: f64,
    /// Source sample rate in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samplerate: Option<u32>,
}

impl Track {
    /// A track with no tags, identified only by its path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Title, falling back to the file name.
    #[must_use]
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map_or_else(|| self.path.display().to_string(), |stem| {
                    stem.to_string_lossy().into_owned()
                })
        })
    }

    /// Whether `other` refers to the same file.
    #[must_use]
    pub fn is_same_track(&self, other: &Track) -> bool {
        self.path == other.path
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.artist.as_deref() {
            Some(artist) => write!(f, "{artist} - {}", self.display_title()),
            None => f.write_str(&self.display_title()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::library::models::Track;

    #[test]
    fn test_display_title_falls_back_to_file_stem() {
        let track = Track::from_path("/music/Album/01 Intro.flac");
        assert_eq!(track.display_title(), "01 Intro");
        assert_eq!(track.to_string(), "01 Intro");

        let tagged = Track {
            title: Some("Intro".to_string()),
            artist: Some("Band".to_string()),
            ..track.clone()
        };
        assert_eq!(tagged.to_string(), "Band - Intro");
        assert!(tagged.is_same_track(&track));
    }
}
