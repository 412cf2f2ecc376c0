//! Library and play queue with a current position.

use std::sync::Arc;

use rand::{Rng, seq::SliceRandom};

use crate::{error::PlayerError, library::Track};

/// Everything scanned, plus the order it is played in.
///
/// The queue holds the same `Arc<Track>`s as the library, either in library
/// order or shuffled. The current index is `Some` exactly when the queue is
/// non-empty.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    library: Vec<Arc<Track>>,
    queue: Vec<Arc<Track>>,
    index: Option<usize>,
}

impl Playlist {
    /// Replaces the library; the queue follows library order from the start.
    pub fn set_library(&mut self, tracks: Vec<Track>) {
        self.library = tracks.into_iter().map(Arc::new).collect();
        self.queue = self.library.clone();
        self.index = if self.queue.is_empty() { None } else { Some(0) };
    }

    /// Tracks in library order.
    pub fn library(&self) -> &[Arc<Track>] {
        &self.library
    }

    /// Tracks in play order.
    pub fn queue(&self) -> &[Arc<Track>] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current queue position.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Track at the current position.
    pub fn current(&self) -> Option<&Arc<Track>> {
        self.index.and_then(|index| self.queue.get(index))
    }

    /// Resolves a play request to a queue position and its track.
    ///
    /// `None` means the current position.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` for an empty queue and `InvalidIndex` for a
    /// position past the end.
    pub fn resolve(&self, index: Option<usize>) -> Result<(usize, Arc<Track>), PlayerError> {
        if self.queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        let index = index.or(self.index).unwrap_or(0);
        self.queue
            .get(index)
            .map(|track| (index, Arc::clone(track)))
            .ok_or(PlayerError::InvalidIndex {
                index,
                len: self.queue.len(),
            })
    }

    /// Moves the current position. Out-of-range positions are ignored.
    pub fn set_index(&mut self, index: usize) {
        if index < self.queue.len() {
            self.index = Some(index);
        }
    }

    /// Position after the current one; wraps to the start only with `repeat`.
    pub fn next_index(&self, repeat: bool) -> Option<usize> {
        let index = self.index?;
        if index + 1 < self.queue.len() {
            Some(index + 1)
        } else if repeat {
            Some(0)
        } else {
            None
        }
    }

    /// Position before the current one; wraps to the end only with `repeat`.
    pub fn previous_index(&self, repeat: bool) -> Option<usize> {
        let index = self.index?;
        if index > 0 {
            Some(index - 1)
        } else if repeat {
            Some(self.queue.len() - 1)
        } else {
            None
        }
    }

    /// Rebuilds the queue from the library, shuffled or in library order.
    ///
    /// The current position follows the current track into the new order.
    pub fn reorder<R: Rng + ?Sized>(&mut self, shuffled: bool, rng: &mut R) {
        let current = self.current().cloned();
        self.queue = self.library.clone();
        if shuffled {
            self.queue.shuffle(rng);
        }

        self.index = match current {
            Some(track) => self
                .queue
                .iter()
                .position(|candidate| candidate.is_same_track(&track))
                .or(Some(0)),
            None if self.queue.is_empty() => None,
            None => Some(0),
        };
    }
}
