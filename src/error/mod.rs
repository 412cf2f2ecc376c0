//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain errors describe precisely why a playback or library operation
//! failed; the operational helpers add context for logging at the edges.

pub mod domain;
pub mod operational;

pub use {
    domain::{LibraryError, PlayerError},
    operational::{ErrorReporter, ResultExt},
};
