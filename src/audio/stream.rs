//! The consumer side of a playback session: the output callback.
//!
//! `StreamCursor` is moved into the device callback. Each tick it copies the
//! next buffered samples into the device buffer, zero-fills whatever the
//! filler has not produced yet, and reports the end of the track once the
//! filler is done and the ring is drained. It never locks, blocks, logs or
//! allocates.

use std::sync::{
    Arc,
    atomic::{
        AtomicBool, AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst},
    },
};

use {async_channel::Sender, rtrb::Consumer};

use crate::audio::{buffer::read_into, sample::PcmSample};

/// How a stream came to an end on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every buffered frame was played.
    Completed,
    /// The device reported an underflow or error; the stream was aborted.
    Underflow,
    /// The filler failed mid-track; what was buffered has been played.
    FillerFailed,
}

/// State shared by the filler, the callback and the session.
#[derive(Debug, Default)]
pub struct StreamStatus {
    streaming: AtomicBool,
    ended: AtomicBool,
    device_error: AtomicBool,
    cancelled: AtomicBool,
    filler_done: AtomicBool,
    filler_failed: AtomicBool,
    frames_written: AtomicU64,
    frames_played: AtomicU64,
}

impl StreamStatus {
    /// Creates a status for a new session.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the stream is delivering audio to the device.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(SeqCst)
    }

    /// Marks callback delivery as running or suspended.
    ///
    /// Has no effect once the stream has ended.
    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, SeqCst);
        if streaming && self.has_ended() {
            self.streaming.store(false, SeqCst);
        }
    }

    /// Whether the output callback has reached the end of the stream.
    pub fn has_ended(&self) -> bool {
        self.ended.load(SeqCst)
    }

    /// Marks a device-side error; the next callback aborts the stream.
    pub fn flag_device_error(&self) {
        self.device_error.store(true, Release);
    }

    /// Asks the filler to stop at its next block.
    pub fn cancel(&self) {
        self.cancelled.store(true, Release);
    }

    /// Cancellation flag polled by the filler.
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    /// Records frames committed to the ring by the filler.
    pub fn add_written(&self, frames: u64) {
        self.frames_written.fetch_add(frames, AcqRel);
    }

    /// Marks the end of the fill; `frames_written` is now the logical length.
    pub fn finish_fill(&self, failed: bool) {
        self.filler_failed.store(failed, Release);
        self.filler_done.store(true, Release);
    }

    /// Whether the filler has stopped producing.
    pub fn is_fill_finished(&self) -> bool {
        self.filler_done.load(Acquire)
    }

    /// Total frames the filler has produced so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Acquire)
    }

    /// Frames handed to the device so far.
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Relaxed)
    }
}

/// Read side of the ring, driven by the device clock.
pub struct StreamCursor<S: PcmSample> {
    consumer: Consumer<S>,
    channels: usize,
    status: Arc<StreamStatus>,
    completion: Sender<StreamEnd>,
    finished: bool,
}

impl<S: PcmSample> StreamCursor<S> {
    /// Wraps the consumer half of a session's ring.
    pub fn new(
        consumer: Consumer<S>,
        channels: usize,
        status: Arc<StreamStatus>,
        completion: Sender<StreamEnd>,
    ) -> Self {
        Self {
            consumer,
            channels: channels.max(1),
            status,
            completion,
            finished: false,
        }
    }

    /// Status shared with the session.
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Whether the end of the stream has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fills one device buffer.
    pub fn render(&mut self, out: &mut [S]) {
        if self.finished {
            out.fill(S::zero());
            return;
        }

        if self.status.device_error.load(Acquire) {
            out.fill(S::zero());
            self.finish(StreamEnd::Underflow);
            return;
        }

        // Load before draining so a completed fill is never missed.
        let fill_finished = self.status.is_fill_finished();

        let copied = read_into(&mut self.consumer, out);
        out[copied..].fill(S::zero());
        self.status
            .frames_played
            .fetch_add((copied / self.channels) as u64, Relaxed);

        if fill_finished && self.consumer.is_empty() {
            let end = if self.status.filler_failed.load(Acquire) {
                StreamEnd::FillerFailed
            } else {
                StreamEnd::Completed
            };
            self.finish(end);
        }
    }

    fn finish(&mut self, end: StreamEnd) {
        self.finished = true;
        self.status.ended.store(true, SeqCst);
        self.status.set_streaming(false);
        let _ = self.completion.try_send(end);
    }
}
