//! handcrafted-player - a local FLAC player.
//!
//! The core is the streaming engine in [`audio`]: device capability probing,
//! a decoder thread feeding a lock-free ring buffer, a real-time output
//! callback draining it, and the `Player` controller that walks the queue.

pub mod audio;
pub mod config;
pub mod error;
pub mod library;
pub mod state;

pub use {
    audio::{AudioBackend, CpalBackend, Device, HostApi, Player},
    config::{EngineSettings, SettingsManager, UserSettings},
    error::{LibraryError, PlayerError},
    library::Track,
    state::{NowPlaying, PlaybackInfo, PlayerEvent},
};
