//! Sample ring buffer between the filler thread and the output callback.
//!
//! The ring is an `rtrb` single-producer single-consumer queue: the filler
//! owns the `Producer`, the output stream owns the `Consumer`, and neither
//! side ever takes a lock. The consumer can only see committed samples, so the
//! read position never overtakes the write position.

use std::{
    sync::atomic::{AtomicBool, Ordering::Acquire},
    thread::sleep,
    time::Duration,
};

use {
    parking_lot::{Condvar, Mutex},
    rtrb::{Consumer, Producer, RingBuffer},
    tracing::debug,
};

use crate::{audio::sample::PcmSample, error::PlayerError};

/// Sleep duration when producer buffer is full.
const PRODUCER_SLEEP_DURATION: Duration = Duration::from_millis(2);

/// Creates a ring holding `blocks` blocks of `block_size` frames.
pub fn sample_ring<S: PcmSample>(
    blocks: usize,
    block_size: usize,
    channels: usize,
) -> (Producer<S>, Consumer<S>) {
    RingBuffer::new(blocks.max(1) * block_size.max(1) * channels.max(1))
}

/// Why a blocking write gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteInterrupted {
    /// The consumer side was dropped.
    Abandoned,
    /// The writer was asked to stop.
    Cancelled,
}

/// Writes every sample of `samples`, sleeping while the ring is full.
///
/// # Errors
///
/// Returns `WriteInterrupted` if the consumer is dropped or `cancel` is set
/// before all samples fit.
pub fn write_all<S: PcmSample>(
    producer: &mut Producer<S>,
    samples: &[S],
    cancel: &AtomicBool,
) -> Result<(), WriteInterrupted> {
    let mut remaining = samples;
    while !remaining.is_empty() {
        if producer.is_abandoned() {
            return Err(WriteInterrupted::Abandoned);
        }
        if cancel.load(Acquire) {
            return Err(WriteInterrupted::Cancelled);
        }

        let free = producer.slots();
        if free == 0 {
            sleep(PRODUCER_SLEEP_DURATION);
            continue;
        }

        let n = free.min(remaining.len());
        if let Ok(chunk) = producer.write_chunk_uninit(n) {
            let written = chunk.fill_from_iter(remaining[..n].iter().copied());
            remaining = &remaining[written..];
        }
    }
    Ok(())
}

/// Copies as many buffered samples as fit into `out` and returns the count.
///
/// Never blocks or allocates; safe to call from the audio callback.
pub fn read_into<S: PcmSample>(consumer: &mut Consumer<S>, out: &mut [S]) -> usize {
    let n = consumer.slots().min(out.len());
    if n == 0 {
        return 0;
    }

    match consumer.read_chunk(n) {
        Ok(chunk) => {
            let (first, second) = chunk.as_slices();
            out[..first.len()].copy_from_slice(first);
            out[first.len()..n].copy_from_slice(second);
            chunk.commit_all();
            n
        }
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Pending,
    Ready,
    Failed(String),
}

/// One-shot signal that the ring holds enough audio to start the stream.
///
/// The gate opens exactly once; a failure before opening is reported to the
/// waiter instead of leaving it blocked.
#[derive(Debug)]
pub struct PrefillGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Default for PrefillGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefillGate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending),
            changed: Condvar::new(),
        }
    }

    /// Opens the gate. Returns `false` if it was already open or failed.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        if *state != GateState::Pending {
            return false;
        }
        *state = GateState::Ready;
        self.changed.notify_all();
        debug!("Prefill gate opened");
        true
    }

    /// Fails the gate with `reason` unless it has already opened.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if *state == GateState::Pending {
            *state = GateState::Failed(reason.into());
            self.changed.notify_all();
        }
    }

    /// Whether the gate has opened.
    pub fn is_open(&self) -> bool {
        *self.state.lock() == GateState::Ready
    }

    /// Blocks until the gate opens or fails, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::PlaybackError` if the filler failed or the
    /// timeout elapsed first.
    pub fn wait(&self, timeout: Duration) -> Result<(), PlayerError> {
        let mut state = self.state.lock();
        let result = self.changed.wait_while_for(
            &mut state,
            |state| *state == GateState::Pending,
            timeout,
        );

        match &*state {
            GateState::Ready => Ok(()),
            GateState::Failed(reason) => Err(PlayerError::PlaybackError {
                reason: reason.clone(),
            }),
            GateState::Pending => {
                debug_assert!(result.timed_out());
                Err(PlayerError::PlaybackError {
                    reason: format!("buffer not filled within {} ms", timeout.as_millis()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering::Release},
        },
        thread::spawn,
        time::Duration,
    };

    use crate::{
        audio::buffer::{PrefillGate, WriteInterrupted, read_into, sample_ring, write_all},
        error::PlayerError,
    };

    #[test]
    fn test_ring_capacity_in_blocks() {
        let (producer, _consumer) = sample_ring::<i16>(4, 10, 2);
        assert_eq!(producer.buffer().capacity(), 80);
    }

    #[test]
    fn test_reader_never_sees_uncommitted_samples() {
        let (mut producer, mut consumer) = sample_ring::<f32>(2, 4, 1);
        let cancel = AtomicBool::new(false);
        let mut out = [9.0_f32; 6];

        assert_eq!(read_into(&mut consumer, &mut out), 0);

        write_all(&mut producer, &[1.0, 2.0, 3.0], &cancel).unwrap();
        assert_eq!(read_into(&mut consumer, &mut out), 3);
        assert_eq!(&out[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reads_wrap_around_the_ring() {
        let (mut producer, mut consumer) = sample_ring::<i32>(1, 4, 1);
        let cancel = AtomicBool::new(false);
        let mut out = [0_i32; 4];

        write_all(&mut producer, &[1, 2, 3], &cancel).unwrap();
        assert_eq!(read_into(&mut consumer, &mut out[..2]), 2);
        write_all(&mut producer, &[4, 5, 6], &cancel).unwrap();
        assert_eq!(read_into(&mut consumer, &mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_writer_stops_when_consumer_is_dropped() {
        let (mut producer, consumer) = sample_ring::<i16>(1, 2, 1);
        let cancel = AtomicBool::new(false);
        drop(consumer);
        assert_eq!(
            write_all(&mut producer, &[1, 2, 3], &cancel),
            Err(WriteInterrupted::Abandoned)
        );
    }

    #[test]
    fn test_writer_stops_when_cancelled() {
        let (mut producer, _consumer) = sample_ring::<i16>(1, 2, 1);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let writer = spawn(move || write_all(&mut producer, &[1, 2, 3, 4], &flag));

        cancel.store(true, Release);
        assert_eq!(writer.join().unwrap(), Err(WriteInterrupted::Cancelled));
    }

    #[test]
    fn test_gate_opens_once() {
        let gate = Arc::new(PrefillGate::new());
        let opener = Arc::clone(&gate);
        let handle = spawn(move || opener.open());

        assert!(gate.wait(Duration::from_secs(5)).is_ok());
        assert!(handle.join().unwrap());
        assert!(!gate.open());
        gate.fail("too late");
        assert!(gate.is_open());
    }

    #[test]
    fn test_gate_reports_failure_and_timeout() {
        let gate = PrefillGate::new();
        gate.fail("decode failed");
        assert!(matches!(
            gate.wait(Duration::from_millis(10)),
            Err(PlayerError::PlaybackError { reason }) if reason == "decode failed"
        ));

        let never = PrefillGate::new();
        assert!(never.wait(Duration::from_millis(10)).is_err());
    }
}
