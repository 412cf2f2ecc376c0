//! Change notifications from the player.
//!
//! Handlers registered with `on_track_changed` / `on_playlist_changed` run
//! synchronously, in subscription order, on the thread that fired the event.
//! They must not block. Async consumers can `subscribe` to the same events
//! over a broadcast channel instead.

use std::sync::Arc;

use {
    parking_lot::RwLock,
    tokio::sync::broadcast::{Receiver, Sender, channel},
};

use crate::{audio::device::Device, library::Track};

type TrackChangedHandler = Arc<dyn Fn(&Arc<Track>, &Device) + Send + Sync>;
type PlaylistChangedHandler = Arc<dyn Fn() + Send + Sync>;

/// Player change events.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A new track started on the given device.
    TrackChanged { track: Arc<Track>, device: Device },
    /// The library or queue order changed.
    PlaylistChanged,
}

/// Ordered observer lists plus a broadcast channel.
pub struct PlayerEvents {
    track_changed: RwLock<Vec<TrackChangedHandler>>,
    playlist_changed: RwLock<Vec<PlaylistChangedHandler>>,
    event_tx: Sender<PlayerEvent>,
}

impl Default for PlayerEvents {
    fn default() -> Self {
        let (event_tx, _) = channel(16);
        Self {
            track_changed: RwLock::new(Vec::new()),
            playlist_changed: RwLock::new(Vec::new()),
            event_tx,
        }
    }
}

impl PlayerEvents {
    pub fn on_track_changed(&self, handler: impl Fn(&Arc<Track>, &Device) + Send + Sync + 'static) {
        self.track_changed.write().push(Arc::new(handler));
    }

    pub fn on_playlist_changed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.playlist_changed.write().push(Arc::new(handler));
    }

    /// Receiver for every event fired after this call.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    pub fn track_changed(&self, track: &Arc<Track>, device: &Device) {
        // Snapshot so a handler may register further handlers.
        let handlers = self.track_changed.read().clone();
        for handler in &handlers {
            handler(track, device);
        }
        let _ = self.event_tx.send(PlayerEvent::TrackChanged {
            track: Arc::clone(track),
            device: device.clone(),
        });
    }

    pub fn playlist_changed(&self) {
        let handlers = self.playlist_changed.read().clone();
        for handler in &handlers {
            handler();
        }
        let _ = self.event_tx.send(PlayerEvent::PlaylistChanged);
    }
}
