//! Player state: the playlist, the "now playing" record and change events.

pub mod events;
pub mod now_playing;
pub mod playlist;

pub use {
    events::{PlayerEvent, PlayerEvents},
    now_playing::{NowPlaying, PlaybackInfo},
    playlist::Playlist,
};
