//! The producer side of a playback session: the buffer filler thread.

use std::{
    path::Path,
    sync::Arc,
    thread::{Builder, JoinHandle},
};

use {
    rtrb::Producer,
    thiserror::Error,
    tracing::{debug, error},
};

use crate::{
    audio::{
        buffer::{PrefillGate, WriteInterrupted, write_all},
        configuration::PlaybackConfiguration,
        decoder::{DecoderError, SourceReader},
        resampler::{AudioResampler, ResamplingError},
        sample::PcmSample,
        stream::StreamStatus,
    },
    error::PlayerError,
};

/// Why a fill ended early.
#[derive(Error, Debug)]
pub enum FillError {
    /// The source could not be read.
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    /// The resampler failed.
    #[error(transparent)]
    Resampling(#[from] ResamplingError),
}

/// How a completed fill ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The whole source was written.
    Finished {
        /// Frames written, the logical length of the track.
        frames: u64,
    },
    /// The session went away before the source was exhausted.
    Interrupted(WriteInterrupted),
}

/// Reads, resamples and buffers one track.
pub struct BufferFiller<S: PcmSample> {
    reader: SourceReader<S>,
    resampler: Option<AudioResampler>,
    producer: Producer<S>,
    gate: Arc<PrefillGate>,
    status: Arc<StreamStatus>,
    channels: usize,
    block_size: usize,
    prefill_blocks: usize,
    total_frames: Option<u64>,
}

impl<S: PcmSample> BufferFiller<S> {
    /// Opens the source and prepares the resampler for `config`.
    ///
    /// # Errors
    ///
    /// Returns `FillError` if the source cannot be opened or the resampler
    /// cannot be built.
    pub fn new(
        config: &PlaybackConfiguration,
        producer: Producer<S>,
        gate: Arc<PrefillGate>,
        status: Arc<StreamStatus>,
    ) -> Result<Self, FillError> {
        let channels = usize::from(config.channels);
        let reader = SourceReader::open(&config.source.path, channels)?;
        let resampler = if config.needs_resampling() {
            Some(AudioResampler::new(
                config.source.sample_rate,
                config.samplerate,
                channels,
                config.block_size,
            )?)
        } else {
            None
        };

        Ok(Self {
            reader,
            resampler,
            producer,
            gate,
            status,
            channels,
            block_size: config.block_size,
            prefill_blocks: config.prefill_blocks,
            total_frames: config.source.frames,
        })
    }

    /// Fills the ring until the source is exhausted or the session goes away.
    ///
    /// The prefill gate opens after `prefill_blocks` blocks, or at the end of
    /// the source for shorter tracks. A resampled track ends with the frames
    /// still held in the resampler.
    ///
    /// # Errors
    ///
    /// Returns `FillError` on decode or resampling failures.
    pub fn run(&mut self) -> Result<FillOutcome, FillError> {
        let mut block = Vec::with_capacity(self.block_size * self.channels);
        let mut resampled = Vec::new();
        let mut frames_read: u64 = 0;
        let mut frames_written: u64 = 0;
        let mut prefill_remaining = self.prefill_blocks;

        loop {
            let mut frames = self.block_size;
            if let Some(total) = self.total_frames {
                if frames_read >= total {
                    break;
                }
                frames = frames.min(usize::try_from(total - frames_read).unwrap_or(frames));
            }

            let mut got = self.reader.read_block(frames, &mut block)?;
            if got == 0 {
                break;
            }
            if got < frames && self.total_frames.is_some() {
                block.resize(frames * self.channels, S::zero());
                got = frames;
            }
            frames_read += got as u64;

            let (samples, produced) = match self.resampler.as_mut() {
                Some(resampler) => {
                    let produced = resampler.process(&block, &mut resampled)?;
                    (resampled.as_slice(), produced)
                }
                None => (block.as_slice(), got),
            };

            if let Err(interrupted) =
                write_all(&mut self.producer, samples, self.status.cancel_flag())
            {
                return Ok(FillOutcome::Interrupted(interrupted));
            }
            frames_written += produced as u64;
            self.status.add_written(produced as u64);

            prefill_remaining = prefill_remaining.saturating_sub(1);
            if prefill_remaining == 0 {
                self.gate.open();
            }
        }

        if let Some(resampler) = self.resampler.as_mut() {
            let produced = resampler.flush(&mut resampled)?;
            if let Err(interrupted) =
                write_all(&mut self.producer, &resampled, self.status.cancel_flag())
            {
                return Ok(FillOutcome::Interrupted(interrupted));
            }
            frames_written += produced as u64;
            self.status.add_written(produced as u64);
        }

        Ok(FillOutcome::Finished {
            frames: frames_written,
        })
    }
}

/// Starts the filler thread for one play request.
///
/// The thread is detached: a stopped session is noticed through the
/// abandoned ring or the cancel flag within one block.
///
/// # Errors
///
/// Returns `PlayerError::PlaybackError` if the thread cannot be spawned.
pub fn spawn_filler<S: PcmSample>(
    config: &PlaybackConfiguration,
    producer: Producer<S>,
    gate: Arc<PrefillGate>,
    status: Arc<StreamStatus>,
) -> Result<JoinHandle<()>, PlayerError> {
    let config = config.clone();
    Builder::new()
        .name("buffer-filler".to_string())
        .spawn(move || fill_track(&config, producer, &gate, &status))
        .map_err(|e| PlayerError::PlaybackError {
            reason: format!("Cannot spawn buffer filler: {e}"),
        })
}

fn fill_track<S: PcmSample>(
    config: &PlaybackConfiguration,
    producer: Producer<S>,
    gate: &Arc<PrefillGate>,
    status: &Arc<StreamStatus>,
) {
    let path: &Path = &config.source.path;
    let result = BufferFiller::new(config, producer, Arc::clone(gate), Arc::clone(status))
        .and_then(|mut filler| filler.run());

    match result {
        Ok(FillOutcome::Finished { frames }) => {
            debug!(path = %path.display(), frames, "Buffer filled");
            status.finish_fill(false);
            gate.open();
        }
        Ok(FillOutcome::Interrupted(reason)) => {
            debug!(path = %path.display(), ?reason, "Buffer fill interrupted");
            gate.fail("playback stopped while buffering");
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Buffer fill failed");
            status.finish_fill(true);
            gate.fail(e.to_string());
        }
    }
}
