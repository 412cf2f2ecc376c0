//! Tag and property extraction using the `lofty` crate.

use std::path::Path;

use {
    lofty::{
        error::LoftyError,
        prelude::{AudioFile, ItemKey::AlbumArtist, TaggedFileExt},
        probe::Probe,
        tag::Accessor,
    },
    thiserror::Error,
};

use crate::library::models::Track;

/// Error type for metadata extraction operations.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Failed to read or parse the audio file.
    #[error("Failed to read tags from {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: LoftyError,
    },
}

/// Reads library tracks from audio files.
pub struct TagReader;

impl TagReader {
    /// Reads tags and audio properties of one file into a `Track`.
    ///
    /// Missing tags are left empty; a file without any tag is still a track.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError` if the file cannot be read or its format is
    /// not recognised.
    pub fn read_track<P: AsRef<Path>>(path: P) -> Result<Track, MetadataError> {
        let path = path.as_ref();
        let read_error = |source| MetadataError::ReadError {
            path: path.display().to_string(),
            source,
        };

        let tagged_file = Probe::open(path)
            .and_then(|probe| probe.read())
            .map_err(read_error)?;

        let primary_tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());
        let properties = tagged_file.properties();

        Ok(Track {
            path: path.to_path_buf(),
            title: primary_tag.and_then(|tag| tag.title().map(|s| s.to_string())),
            album: primary_tag.and_then(|tag| tag.album().map(|s| s.to_string())),
            artist: primary_tag.and_then(|tag| tag.artist().map(|s| s.to_string())),
            album_artist: primary_tag
                .and_then(|tag| tag.get_string(AlbumArtist).map(|s| s.to_string())),
            duration: properties.duration().as_secs_f64(),
            samplerate: properties.sample_rate(),
        })
    }
}
