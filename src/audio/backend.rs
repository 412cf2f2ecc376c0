//! Seam between the engine and the host audio subsystem.

use crate::{
    audio::{
        configuration::PlaybackConfiguration,
        device::{Device, ExclusiveFlags, HostApi},
        sample::SampleFormat,
        stream::StreamCursor,
    },
    error::PlayerError,
};

/// Output callback state for one stream, typed by sample format.
pub enum Renderer {
    /// 16-bit integer stream.
    I16(StreamCursor<i16>),
    /// 32-bit integer stream.
    I32(StreamCursor<i32>),
    /// 32-bit float stream.
    F32(StreamCursor<f32>),
}

impl Renderer {
    /// Sample format the device stream must be opened with.
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            Self::I16(_) => SampleFormat::I16,
            Self::I32(_) => SampleFormat::I32,
            Self::F32(_) => SampleFormat::F32,
        }
    }
}

impl From<StreamCursor<i16>> for Renderer {
    fn from(cursor: StreamCursor<i16>) -> Self {
        Self::I16(cursor)
    }
}

impl From<StreamCursor<i32>> for Renderer {
    fn from(cursor: StreamCursor<i32>) -> Self {
        Self::I32(cursor)
    }
}

impl From<StreamCursor<f32>> for Renderer {
    fn from(cursor: StreamCursor<f32>) -> Self {
        Self::F32(cursor)
    }
}

/// A host audio subsystem.
pub trait AudioBackend: Send + Sync {
    /// Snapshot of host APIs and their output devices.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if enumeration fails.
    fn host_apis(&self) -> Result<Vec<HostApi>, PlayerError>;

    /// Whether `device` accepts an output stream with these parameters.
    fn supports_output(
        &self,
        device: &Device,
        channels: u16,
        samplerate: u32,
        flags: ExclusiveFlags,
    ) -> bool;

    /// Opens a stopped output stream that pulls audio from `renderer`.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device is gone or refuses the
    /// configuration.
    fn open_output(
        &self,
        device: &Device,
        config: &PlaybackConfiguration,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputHandle>, PlayerError>;
}

/// Control over an opened output stream.
pub trait OutputHandle: Send {
    /// Starts or resumes callback delivery.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to start.
    fn start(&mut self) -> Result<(), PlayerError>;

    /// Suspends callback delivery, keeping the stream open.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to pause.
    fn pause(&mut self) -> Result<(), PlayerError>;

    /// Closes the stream. When this returns no further callbacks run.
    fn stop(&mut self);
}
