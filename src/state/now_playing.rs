//! The "now playing" handle.

use std::sync::Arc;

use {
    parking_lot::RwLock,
    serde::{Deserialize, Serialize},
};

use crate::{audio::session::PlaybackMetadata, library::Track};

/// Negotiated stream parameters and progress of the current track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    /// Output channel count.
    pub channels: u16,
    /// Bit-depth label, e.g. "Signed 24 bit PCM".
    pub bit_depth: String,
    /// Container label, e.g. "FLAC".
    pub format: String,
    /// Stream sample rate in Hz.
    pub samplerate: u32,
    /// Whole seconds played.
    pub elapsed: u64,
}

impl From<&PlaybackMetadata> for PlaybackInfo {
    fn from(metadata: &PlaybackMetadata) -> Self {
        Self {
            channels: metadata.channels,
            bit_depth: metadata.bit_depth.clone(),
            format: metadata.format.clone(),
            samplerate: metadata.samplerate,
            elapsed: 0,
        }
    }
}

/// The playing track and its shared playback record.
///
/// Clones share the record, so every holder sees the same elapsed time.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    track: Arc<Track>,
    info: Arc<RwLock<PlaybackInfo>>,
}

impl NowPlaying {
    /// Starts a record for `track` with elapsed at zero.
    pub fn new(track: Arc<Track>, metadata: &PlaybackMetadata) -> Self {
        Self {
            track,
            info: Arc::new(RwLock::new(PlaybackInfo::from(metadata))),
        }
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    /// Snapshot of the playback record.
    pub fn info(&self) -> PlaybackInfo {
        self.info.read().clone()
    }

    pub fn elapsed(&self) -> u64 {
        self.info.read().elapsed
    }

    /// Adds one second of progress.
    pub fn tick(&self) {
        self.info.write().elapsed += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        audio::session::PlaybackMetadata,
        library::Track,
        state::now_playing::NowPlaying,
    };

    #[test]
    fn test_clones_share_progress() {
        let metadata = PlaybackMetadata {
            samplerate: 96_000,
            channels: 2,
            bit_depth: "Signed 24 bit PCM".to_string(),
            format: "FLAC".to_string(),
        };
        let now_playing = NowPlaying::new(Arc::new(Track::from_path("/a.flac")), &metadata);
        let observer = now_playing.clone();

        now_playing.tick();
        now_playing.tick();
        assert_eq!(observer.elapsed(), 2);

        let info = observer.info();
        assert_eq!(info.samplerate, 96_000);
        assert_eq!(info.format, "FLAC");
    }
}
