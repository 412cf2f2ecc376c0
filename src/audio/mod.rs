//! Audio playback engine.
//!
//! Device catalog and capability probing, playback configuration, the
//! filler/stream pair that moves samples through a lock-free ring buffer, the
//! playback session and the queue-driven `Player` on top of it.

pub mod backend;
pub mod buffer;
pub mod configuration;
pub mod cpal_backend;
pub mod decoder;
pub mod device;
pub mod filler;
pub mod format_detector;
pub mod metadata;
pub mod player;
pub mod probe;
pub mod resampler;
pub mod sample;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    backend::{AudioBackend, OutputHandle},
    cpal_backend::CpalBackend,
    device::{Device, ExclusiveFlags, HostApi, default_output_device, find_output_device},
    player::Player,
    session::{PendingStream, PlaybackMetadata, PlaybackSession, SessionState},
};
