//! The playback controller.
//!
//! `Player` owns the playlist, the repeat/shuffle flags and one
//! `PlaybackSession` for the selected output device. Every successful `play`
//! starts a watcher task that counts elapsed seconds and moves on to the next
//! track when the stream ends on its own.
//!
//! Each `play` and `stop` bumps a generation counter; a watcher or a pending
//! play request that belongs to an older generation gives up quietly.

use std::{
    path::Path,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
    },
    time::Duration,
};

use {
    async_channel::Receiver,
    parking_lot::{Mutex, RwLock},
    rand::rng,
    tokio::{
        select,
        sync::{Mutex as AsyncMutex, broadcast},
        task::{AbortHandle, spawn, spawn_blocking},
        time::{Instant, MissedTickBehavior, interval_at},
    },
    tracing::{debug, info, warn},
};

use crate::{
    audio::{
        backend::AudioBackend,
        device::{Device, HostApi},
        session::PlaybackSession,
        stream::StreamEnd,
    },
    config::{EngineSettings, UserSettings},
    error::PlayerError,
    library::{LibraryScanner, ScannerConfig, Track},
    state::{NowPlaying, PlayerEvent, PlayerEvents, Playlist},
};

struct PlayerInner {
    backend: Arc<dyn AudioBackend>,
    engine: EngineSettings,
    scanner: ScannerConfig,
    session: Mutex<Option<PlaybackSession>>,
    playlist: RwLock<Playlist>,
    now_playing: RwLock<Option<NowPlaying>>,
    repeat: AtomicBool,
    shuffle: AtomicBool,
    stopped: AtomicBool,
    events: PlayerEvents,
    generation: AtomicU64,
    watcher: Mutex<Option<AbortHandle>>,
    play_lock: AsyncMutex<()>,
}

/// Queue-driven playback on one output device.
///
/// Cheap to clone; clones control the same player. Async methods must be
/// called from within a tokio runtime.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

enum WatchStep {
    Continue,
    Advance,
    Exit,
}

impl Player {
    /// Creates a stopped player with an empty playlist and no output device.
    pub fn new(backend: Arc<dyn AudioBackend>, settings: &UserSettings) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                backend,
                engine: settings.engine.clone(),
                scanner: ScannerConfig::from_settings(settings),
                session: Mutex::new(None),
                playlist: RwLock::new(Playlist::default()),
                now_playing: RwLock::new(None),
                repeat: AtomicBool::new(false),
                shuffle: AtomicBool::new(false),
                stopped: AtomicBool::new(true),
                events: PlayerEvents::default(),
                generation: AtomicU64::new(0),
                watcher: Mutex::new(None),
                play_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Host APIs and their output devices, as the backend sees them now.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if enumeration fails.
    pub fn output_devices_by_api(&self) -> Result<Vec<HostApi>, PlayerError> {
        self.inner.backend.host_apis()
    }

    /// Switches output to `device`, stopping whatever is playing.
    pub fn set_output_device(&self, device: Device) {
        self.stop();
        info!(
            device = %device.name,
            host_api = %device.host_api_name,
            "Output device selected"
        );
        let session = PlaybackSession::new(
            Arc::clone(&self.inner.backend),
            device,
            self.inner.engine.clone(),
        );
        *self.inner.session.lock() = Some(session);
    }

    pub fn current_device(&self) -> Option<Device> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.device().clone())
    }

    /// Scans `path` and replaces the library with what was found.
    ///
    /// Returns the number of tracks loaded.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::LibraryError` if `path` cannot be read.
    pub async fn load_library(&self, path: impl AsRef<Path>) -> Result<usize, PlayerError> {
        let root = path.as_ref().to_path_buf();
        let scanner = LibraryScanner::new(self.inner.scanner.clone());
        let tracks = spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| PlayerError::PlaybackError {
                reason: format!("Library scan task failed: {e}"),
            })??;
        Ok(self.set_library(tracks))
    }

    /// Replaces the library with `tracks`; the queue follows library order.
    ///
    /// Shuffle is switched off. Playback is not interrupted.
    pub fn set_library(&self, tracks: Vec<Track>) -> usize {
        let count = tracks.len();
        self.inner.playlist.write().set_library(tracks);
        self.inner.shuffle.store(false, SeqCst);
        info!(tracks = count, "Library loaded");
        self.inner.events.playlist_changed();
        count
    }

    /// The queue in play order.
    pub fn current_playlist(&self) -> Vec<Arc<Track>> {
        self.inner.playlist.read().queue().to_vec()
    }

    pub fn current_track_index(&self) -> Option<usize> {
        self.inner.playlist.read().index()
    }

    /// The track that last started, with its negotiated parameters and
    /// elapsed time.
    pub fn current_track(&self) -> Option<NowPlaying> {
        self.inner.now_playing.read().clone()
    }

    /// Whether the output stream is receiving callbacks right now.
    pub fn is_playing(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(PlaybackSession::is_playing)
    }

    pub fn is_paused(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(PlaybackSession::is_paused)
    }

    /// Whether playback was stopped explicitly or ran off the end of the queue.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(SeqCst)
    }

    pub fn is_repeat_enabled(&self) -> bool {
        self.inner.repeat.load(SeqCst)
    }

    pub fn is_shuffle_enabled(&self) -> bool {
        self.inner.shuffle.load(SeqCst)
    }

    /// Why the last stream ended abnormally, if it did.
    pub fn last_stream_error(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(PlaybackSession::last_stream_error)
            .map(ToString::to_string)
    }

    /// Registers a handler for track changes.
    pub fn on_track_changed(&self, handler: impl Fn(&Arc<Track>, &Device) + Send + Sync + 'static) {
        self.inner.events.on_track_changed(handler);
    }

    /// Registers a handler for library and queue order changes.
    pub fn on_playlist_changed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.events.on_playlist_changed(handler);
    }

    /// Receiver for player events fired after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Plays the track at `index`, or the current track for `None`.
    ///
    /// Waits until enough audio is buffered and the stream has started.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` or `InvalidIndex` for a bad position,
    /// `NoDeviceSelected` without an output device, and whatever the session
    /// reports otherwise. On error the current index is unchanged and no
    /// event fires.
    pub async fn play(&self, index: Option<usize>) -> Result<(), PlayerError> {
        self.play_track(index, None).await
    }

    async fn play_track(
        &self,
        index: Option<usize>,
        expected_generation: Option<u64>,
    ) -> Result<(), PlayerError> {
        let _guard = self.inner.play_lock.lock().await;
        if let Some(expected) = expected_generation
            && !self.is_current(expected)
        {
            debug!("Auto-advance superseded");
            return Ok(());
        }

        let (index, track) = self.inner.playlist.read().resolve(index)?;
        let generation = self.cancel_watcher();

        let inner = Arc::clone(&self.inner);
        let path = track.path.clone();
        let started = spawn_blocking(move || {
            let pending = inner
                .session
                .lock()
                .as_mut()
                .ok_or(PlayerError::NoDeviceSelected)?
                .prepare(&path)?;
            // Buffering happens without the session lock so that status
            // queries and `stop` stay responsive.
            let primed = pending.prime();

            let mut guard = inner.session.lock();
            let session = guard.as_mut().ok_or(PlayerError::NoDeviceSelected)?;
            let metadata = session.commit(pending, primed)?;
            Ok::<_, PlayerError>((metadata, session.device().clone(), session.completion()))
        })
        .await
        .map_err(|e| PlayerError::PlaybackError {
            reason: format!("Playback task failed: {e}"),
        })?;
        let (metadata, device, completion) = match started {
            Ok(started) => started,
            Err(e) if !self.is_current(generation) => {
                debug!(track = %track, error = %e, "Play request cancelled while buffering");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !self.is_current(generation) {
            debug!(track = %track, "Play request superseded by stop");
            if let Some(session) = self.inner.session.lock().as_mut() {
                session.stop();
            }
            return Ok(());
        }

        self.inner.playlist.write().set_index(index);
        *self.inner.now_playing.write() = Some(NowPlaying::new(Arc::clone(&track), &metadata));
        self.inner.stopped.store(false, SeqCst);

        info!(track = %track, index, device = %device.name, "Now playing");
        self.inner.events.track_changed(&track, &device);
        self.spawn_watcher(generation, completion);
        Ok(())
    }

    /// Suspends playback, keeping the position. No-op when not playing.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to pause.
    pub fn pause(&self) -> Result<(), PlayerError> {
        match self.inner.session.lock().as_mut() {
            Some(session) => session.pause(),
            None => Ok(()),
        }
    }

    /// Continues paused playback. No-op when not paused.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to start.
    pub fn resume(&self) -> Result<(), PlayerError> {
        match self.inner.session.lock().as_mut() {
            Some(session) => session.resume(),
            None => Ok(()),
        }
    }

    /// Stops playback. No track is started afterwards until `play` is called.
    pub fn stop(&self) {
        self.inner.stopped.store(true, SeqCst);
        self.cancel_watcher();
        if let Some(session) = self.inner.session.lock().as_mut() {
            session.stop();
        }
        debug!("Player stopped");
    }

    /// Plays the next track. At the end of the queue this wraps with repeat
    /// on and does nothing otherwise.
    ///
    /// # Errors
    ///
    /// See [`Player::play`].
    pub async fn next(&self) -> Result<(), PlayerError> {
        let next = self
            .inner
            .playlist
            .read()
            .next_index(self.is_repeat_enabled());
        match next {
            Some(index) => self.play(Some(index)).await,
            None => {
                debug!("No next track");
                Ok(())
            }
        }
    }

    /// Plays the previous track. At the start of the queue this wraps with
    /// repeat on and does nothing otherwise.
    ///
    /// # Errors
    ///
    /// See [`Player::play`].
    pub async fn previous(&self) -> Result<(), PlayerError> {
        let previous = self
            .inner
            .playlist
            .read()
            .previous_index(self.is_repeat_enabled());
        match previous {
            Some(index) => self.play(Some(index)).await,
            None => {
                debug!("No previous track");
                Ok(())
            }
        }
    }

    /// Toggles shuffle and rebuilds the queue around the current track.
    pub fn shuffle(&self) {
        let enabled = !self.inner.shuffle.fetch_xor(true, SeqCst);
        self.inner.playlist.write().reorder(enabled, &mut rng());
        debug!(enabled, "Shuffle toggled");
        self.inner.events.playlist_changed();
    }

    /// Toggles repeat of the whole queue.
    pub fn repeat(&self) {
        let enabled = !self.inner.repeat.fetch_xor(true, SeqCst);
        debug!(enabled, "Repeat toggled");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(SeqCst) == generation
    }

    /// Starts a new generation and aborts the running watcher.
    fn cancel_watcher(&self) -> u64 {
        let generation = self.inner.generation.fetch_add(1, SeqCst) + 1;
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.abort();
        }
        generation
    }

    fn spawn_watcher(&self, generation: u64, completion: Option<Receiver<StreamEnd>>) {
        let task = spawn(watch(
            Arc::downgrade(&self.inner),
            generation,
            completion,
            self.inner.engine.watch_interval(),
        ));

        let mut slot = self.inner.watcher.lock();
        if self.is_current(generation) {
            *slot = Some(task.abort_handle());
        } else {
            task.abort();
        }
    }

    /// Lets a watcher outlive the `play` it is about to trigger.
    fn detach_watcher(&self, generation: u64) {
        let mut slot = self.inner.watcher.lock();
        if self.is_current(generation) {
            slot.take();
        }
    }

    fn watch_step(&self, generation: u64, reported: Option<StreamEnd>) -> WatchStep {
        let mut guard = self.inner.session.lock();
        // A newer play or stop may have taken over since the watcher woke up.
        if !self.is_current(generation) {
            return WatchStep::Exit;
        }
        let Some(session) = guard.as_mut() else {
            return WatchStep::Exit;
        };

        let end = match reported {
            Some(end) => {
                session.conclude(end);
                end
            }
            None if session.is_paused() => return WatchStep::Continue,
            None if session.is_playing() => {
                if let Some(now_playing) = self.inner.now_playing.read().as_ref() {
                    now_playing.tick();
                }
                return WatchStep::Continue;
            }
            None => match session.reap() {
                Some(end) => end,
                None => return WatchStep::Continue,
            },
        };
        drop(guard);

        if self.is_stopped() {
            return WatchStep::Exit;
        }
        debug!(?end, "Track ended");
        WatchStep::Advance
    }

    async fn advance(&self, generation: u64) {
        let next = self
            .inner
            .playlist
            .read()
            .next_index(self.is_repeat_enabled());
        let Some(index) = next else {
            info!("End of queue");
            self.inner.stopped.store(true, SeqCst);
            return;
        };

        if let Err(e) = self.play_track(Some(index), Some(generation)).await {
            warn!(index, error = %e, "Cannot advance to next track");
            self.inner.stopped.store(true, SeqCst);
        }
    }
}

/// Waits for the next end-of-stream report; pends forever once the stream
/// is gone.
async fn stream_end(completion: &mut Option<Receiver<StreamEnd>>) -> StreamEnd {
    if let Some(receiver) = completion
        && let Ok(end) = receiver.recv().await
    {
        return end;
    }
    *completion = None;
    std::future::pending().await
}

async fn watch(
    inner: Weak<PlayerInner>,
    generation: u64,
    mut completion: Option<Receiver<StreamEnd>>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let reported = select! {
            _ = ticker.tick() => None,
            end = stream_end(&mut completion) => Some(end),
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let player = Player { inner };
        if !player.is_current(generation) {
            return;
        }

        match player.watch_step(generation, reported) {
            WatchStep::Continue => {}
            WatchStep::Exit => return,
            WatchStep::Advance => {
                player.detach_watcher(generation);
                player.advance(generation).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::Ordering::SeqCst};

    use tempfile::tempdir;

    use crate::{
        audio::{
            device::test_device,
            player::{Player, WatchStep},
            stream::StreamEnd,
            test_support::{FakeBackend, write_test_wav},
        },
        config::{EngineSettings, UserSettings},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn test_outdated_watcher_leaves_new_stream_alone() {
        let dir = tempdir().unwrap();
        write_test_wav(&dir.path().join("a.wav"), 8_000, 8_000);
        let settings = UserSettings {
            library_extensions: vec!["wav".to_string()],
            engine: EngineSettings {
                prefill_blocks: 2,
                ..EngineSettings::default()
            },
            ..UserSettings::default()
        };
        let backend = Arc::new(FakeBackend::new(vec![test_device(0, "ALSA", "DAC")]));
        let player = Player::new(backend.clone(), &settings);
        player.set_output_device(test_device(0, "ALSA", "DAC"));
        player.load_library(dir.path()).await.unwrap();

        player.play(None).await.unwrap();
        let outdated = player.inner.generation.load(SeqCst);
        player.play(None).await.unwrap();

        let step = player.watch_step(outdated, Some(StreamEnd::Underflow));
        assert!(matches!(step, WatchStep::Exit));
        assert!(player.is_playing());
        assert_eq!(backend.live_streams(), 1);
        assert!(player.last_stream_error().is_none());
    }
}
