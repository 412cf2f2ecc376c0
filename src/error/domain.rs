//! Domain-specific error types using `thiserror`.
//!
//! `PlayerError` is the taxonomy surfaced by the playback engine; library
//! loading has its own `LibraryError` so per-file failures can be skipped.

use std::{io::Error as StdError, path::PathBuf, result::Result as StdResult};

use {anyhow::Error, thiserror::Error};

use crate::audio::{decoder::DecoderError, metadata::MetadataError};

/// Playback engine errors.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// The capability probe found no sample rate the device accepts.
    #[error("Device unusable: {device} accepts none of the candidate sample rates")]
    DeviceUnusable { device: String },
    /// The source file could not be opened or parsed.
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] DecoderError),
    /// The device signalled an underrun; the stream was aborted.
    #[error("Output underflow on {device}")]
    OutputUnderflow { device: String },
    /// The buffer filler failed before or during playback.
    #[error("Playback error: {reason}")]
    PlaybackError { reason: String },
    /// The audio subsystem refused a request.
    #[error("Audio backend error: {reason}")]
    Backend { reason: String },
    /// No output device has been selected yet.
    #[error("No output device selected")]
    NoDeviceSelected,
    /// The playback queue holds no tracks.
    #[error("Playback queue is empty")]
    EmptyQueue,
    /// Requested queue position does not exist.
    #[error("Track index {index} is out of range for a queue of {len}")]
    InvalidIndex { index: usize, len: usize },
    /// Library loading failed as a whole.
    #[error("Library error: {0}")]
    LibraryError(#[from] LibraryError),
}

/// Library-related errors.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// The library root could not be read.
    #[error("Cannot read library directory {path:?}: {source}")]
    ScanError {
        path: PathBuf,
        #[source]
        source: StdError,
    },
    /// Tags or properties of a single file could not be read.
    #[error("Metadata error: {0}")]
    MetadataError(#[from] MetadataError),
}

/// Operational error context propagation with `anyhow`.
pub type Result<T> = StdResult<T, Error>;
