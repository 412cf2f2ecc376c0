//! Playback session: one filler thread and one output stream per file.
//!
//! ```text
//! Idle --play--> Priming --gate open--> Streaming <--pause/resume--> Paused
//!   ^                                       |
//!   +---------------- stop / end -----------+
//! ```

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use {
    async_channel::{Receiver, bounded},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    audio::{
        backend::{AudioBackend, OutputHandle, Renderer},
        buffer::{PrefillGate, sample_ring},
        configuration::{PlaybackConfiguration, output_channels},
        device::{Device, ExclusiveFlags},
        filler::spawn_filler,
        probe::probe_max_samplerate,
        sample::{PcmSample, SampleFormat},
        stream::{StreamCursor, StreamEnd, StreamStatus},
    },
    config::EngineSettings,
    error::PlayerError,
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No stream.
    Idle,
    /// Buffering before the stream starts.
    Priming,
    /// The stream is open and running.
    Streaming,
    /// The stream is open and suspended.
    Paused,
}

/// What was negotiated for the track that just started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackMetadata {
    /// Stream sample rate in Hz.
    pub samplerate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Bit-depth label of the source.
    pub bit_depth: String,
    /// Container label of the source.
    pub format: String,
}

impl From<&PlaybackConfiguration> for PlaybackMetadata {
    fn from(config: &PlaybackConfiguration) -> Self {
        Self {
            samplerate: config.samplerate,
            channels: config.channels,
            bit_depth: config.source.bit_depth.clone(),
            format: config.source.format.clone(),
        }
    }
}

const STOPPED_WHILE_BUFFERING: &str = "playback stopped while buffering";

/// A stream whose filler is running but whose output has not started.
///
/// Dropping it without [`PlaybackSession::commit`] closes the output.
pub struct PendingStream {
    output: Option<Box<dyn OutputHandle>>,
    status: Arc<StreamStatus>,
    gate: Arc<PrefillGate>,
    completion: Receiver<StreamEnd>,
    config: PlaybackConfiguration,
    timeout: Duration,
}

impl PendingStream {
    /// Blocks until enough audio is buffered, the fill fails, or the session
    /// is stopped.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::PlaybackError` if the gate failed or timed out.
    pub fn prime(&self) -> Result<(), PlayerError> {
        self.gate.wait(self.timeout)
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        if let Some(mut output) = self.output.take() {
            self.status.cancel();
            output.stop();
        }
    }
}

struct Priming {
    status: Arc<StreamStatus>,
    gate: Arc<PrefillGate>,
}

struct ActiveStream {
    output: Box<dyn OutputHandle>,
    status: Arc<StreamStatus>,
    completion: Receiver<StreamEnd>,
    config: PlaybackConfiguration,
}

/// Plays files on one output device.
pub struct PlaybackSession {
    backend: Arc<dyn AudioBackend>,
    device: Device,
    engine: EngineSettings,
    probed: HashMap<(u16, ExclusiveFlags), u32>,
    priming: Option<Priming>,
    active: Option<ActiveStream>,
    state: SessionState,
    last_stream_error: Option<PlayerError>,
}

impl PlaybackSession {
    /// Creates an idle session for `device`.
    pub fn new(backend: Arc<dyn AudioBackend>, device: Device, engine: EngineSettings) -> Self {
        Self {
            backend,
            device,
            engine,
            probed: HashMap::new(),
            priming: None,
            active: None,
            state: SessionState::Idle,
            last_stream_error: None,
        }
    }

    /// The output device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the previous stream ended abnormally, if it did.
    pub fn last_stream_error(&self) -> Option<&PlayerError> {
        self.last_stream_error.as_ref()
    }

    /// End-of-stream notifications of the live stream.
    pub fn completion(&self) -> Option<Receiver<StreamEnd>> {
        self.active.as_ref().map(|active| active.completion.clone())
    }

    /// Highest sample rate the device accepts, probed once per channel count.
    pub fn max_samplerate(&mut self, channels: u16, flags: ExclusiveFlags) -> u32 {
        if let Some(rate) = self.probed.get(&(channels, flags)) {
            return *rate;
        }
        let rate = probe_max_samplerate(self.backend.as_ref(), &self.device, channels, flags);
        self.probed.insert((channels, flags), rate);
        rate
    }

    /// Starts playing `path`, replacing any live stream.
    ///
    /// Blocks until the prefill gate opens, then starts the stream.
    ///
    /// # Errors
    ///
    /// See [`PlaybackSession::prepare`] and [`PlaybackSession::commit`].
    pub fn play(&mut self, path: &Path) -> Result<PlaybackMetadata, PlayerError> {
        let pending = self.prepare(path)?;
        let primed = pending.prime();
        self.commit(pending, primed)
    }

    /// Replaces any live stream with a primed but not yet started stream
    /// for `path`.
    ///
    /// The returned stream fills in the background; wait on
    /// [`PendingStream::prime`] without holding the session, then hand it to
    /// [`PlaybackSession::commit`]. `stop` cancels it in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnusable` if the device accepts no candidate rate,
    /// `ConfigurationError` if the file cannot be opened, and `Backend` if
    /// the stream cannot be opened. The session is idle afterwards.
    pub fn prepare(&mut self, path: &Path) -> Result<PendingStream, PlayerError> {
        self.stop();
        self.last_stream_error = None;
        self.state = SessionState::Priming;

        match self.open(path) {
            Ok(pending) => {
                self.priming = Some(Priming {
                    status: Arc::clone(&pending.status),
                    gate: Arc::clone(&pending.gate),
                });
                Ok(pending)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Starts `pending` once priming is over.
    ///
    /// # Errors
    ///
    /// Returns the priming error if `primed` failed, `PlaybackError` if the
    /// session was stopped or re-primed since `prepare`, and `Backend` if
    /// the device refuses to start. The pending stream is torn down on error.
    pub fn commit(
        &mut self,
        pending: PendingStream,
        primed: Result<(), PlayerError>,
    ) -> Result<PlaybackMetadata, PlayerError> {
        let current = self
            .priming
            .as_ref()
            .is_some_and(|priming| Arc::ptr_eq(&priming.status, &pending.status));
        if !current {
            return Err(PlayerError::PlaybackError {
                reason: STOPPED_WHILE_BUFFERING.to_string(),
            });
        }
        self.priming = None;

        let result = primed.and_then(|()| self.start(pending));
        if result.is_err() {
            self.state = SessionState::Idle;
        }
        result
    }

    fn open(&mut self, path: &Path) -> Result<PendingStream, PlayerError> {
        let channels = output_channels(&self.device);
        let flags = self.device.exclusive_flags(self.engine.exclusive_mode);
        let max_samplerate = self.max_samplerate(channels, flags);
        let config = PlaybackConfiguration::build(path, &self.device, max_samplerate, &self.engine)?;

        match config.sample_format {
            SampleFormat::I16 => self.open_stream::<i16>(config),
            SampleFormat::I32 => self.open_stream::<i32>(config),
            SampleFormat::F32 => self.open_stream::<f32>(config),
        }
    }

    fn open_stream<S>(&self, config: PlaybackConfiguration) -> Result<PendingStream, PlayerError>
    where
        S: PcmSample,
        Renderer: From<StreamCursor<S>>,
    {
        let channels = usize::from(config.channels);
        let (producer, consumer) =
            sample_ring::<S>(config.ring_blocks, config.block_size, channels);
        let status = StreamStatus::new();
        let gate = Arc::new(PrefillGate::new());
        let (completion_tx, completion) = bounded(1);

        spawn_filler(&config, producer, Arc::clone(&gate), Arc::clone(&status))?;

        let cursor = StreamCursor::new(consumer, channels, Arc::clone(&status), completion_tx);
        let output = self
            .backend
            .open_output(&self.device, &config, Renderer::from(cursor))
            .inspect_err(|_| status.cancel())?;

        Ok(PendingStream {
            output: Some(output),
            status,
            gate,
            completion,
            config,
            timeout: self.engine.prefill_timeout(),
        })
    }

    fn start(&mut self, mut pending: PendingStream) -> Result<PlaybackMetadata, PlayerError> {
        let Some(mut output) = pending.output.take() else {
            return Err(PlayerError::PlaybackError {
                reason: "stream already started".to_string(),
            });
        };

        let status = Arc::clone(&pending.status);
        status.set_streaming(true);
        if let Err(e) = output.start() {
            status.set_streaming(false);
            status.cancel();
            output.stop();
            return Err(e);
        }

        let metadata = PlaybackMetadata::from(&pending.config);
        info!(
            path = %pending.config.source.path.display(),
            device = %self.device.name,
            samplerate = metadata.samplerate,
            channels = metadata.channels,
            format = %metadata.format,
            bit_depth = %metadata.bit_depth,
            "Playback started"
        );
        self.active = Some(ActiveStream {
            output,
            status,
            completion: pending.completion.clone(),
            config: pending.config.clone(),
        });
        self.state = SessionState::Streaming;
        Ok(metadata)
    }

    /// Suspends callback delivery. No-op without a running stream.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to pause.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        if let Some(active) = self.active.as_mut() {
            active.output.pause()?;
            active.status.set_streaming(false);
            self.state = SessionState::Paused;
            debug!("Playback paused");
        }
        Ok(())
    }

    /// Resumes callback delivery. No-op unless paused.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Backend` if the device refuses to start.
    pub fn resume(&mut self) -> Result<(), PlayerError> {
        if self.state != SessionState::Paused {
            return Ok(());
        }
        if let Some(active) = self.active.as_mut() {
            active.status.set_streaming(true);
            if let Err(e) = active.output.start() {
                active.status.set_streaming(false);
                return Err(e);
            }
            self.state = SessionState::Streaming;
            debug!("Playback resumed");
        }
        Ok(())
    }

    /// Tears down the live stream. Idempotent.
    ///
    /// When this returns no output callback is running; the filler thread
    /// exits on its own. A stream still priming is cancelled and its
    /// `prime` returns early.
    pub fn stop(&mut self) {
        if let Some(priming) = self.priming.take() {
            priming.status.cancel();
            priming.gate.fail(STOPPED_WHILE_BUFFERING);
            debug!("Priming cancelled");
        }
        if let Some(mut active) = self.active.take() {
            active.status.cancel();
            active.status.set_streaming(false);
            active.output.stop();
            debug!(
                path = %active.config.source.path.display(),
                frames = active.status.frames_played(),
                "Playback stopped"
            );
        }
        self.state = SessionState::Idle;
    }

    /// Whether the stream is receiving callbacks right now.
    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Streaming
            && self
                .active
                .as_ref()
                .is_some_and(|active| active.status.is_streaming())
    }

    /// Whether the session is paused.
    pub fn is_paused(&self) -> bool {
        self.state == SessionState::Paused
    }

    /// Whether the live stream reached its end on its own.
    pub fn has_ended(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.status.has_ended())
    }

    /// Tears down a stream that ended on its own and records why.
    ///
    /// Returns `None` if no stream has ended.
    pub fn reap(&mut self) -> Option<StreamEnd> {
        let end = {
            let active = self.active.as_ref()?;
            match active.completion.try_recv() {
                Ok(end) => end,
                Err(_) if active.status.has_ended() => StreamEnd::Completed,
                Err(_) => return None,
            }
        };
        self.conclude(end);
        Some(end)
    }

    /// Tears down the live stream after it reported `end`, recording
    /// abnormal ends in `last_stream_error`.
    pub fn conclude(&mut self, end: StreamEnd) {
        match end {
            StreamEnd::Completed => {}
            StreamEnd::Underflow => {
                warn!(device = %self.device.name, "Output underflow, stream aborted");
                self.last_stream_error = Some(PlayerError::OutputUnderflow {
                    device: self.device.name.clone(),
                });
            }
            StreamEnd::FillerFailed => {
                warn!("Buffer filler failed mid-track");
                self.last_stream_error = Some(PlayerError::PlaybackError {
                    reason: "buffer filler failed mid-track".to_string(),
                });
            }
        }
        self.stop();
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use tempfile::tempdir;

    use crate::{
        audio::{
            device::{ExclusiveFlags, test_device},
            session::{PlaybackSession, SessionState},
            stream::StreamEnd,
            test_support::{FakeBackend, write_test_wav},
        },
        config::EngineSettings,
        error::PlayerError,
    };

    fn engine() -> EngineSettings {
        EngineSettings {
            prefill_blocks: 2,
            ..EngineSettings::default()
        }
    }

    #[test]
    fn test_play_pause_resume_stop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 8_000, 8_000);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        let metadata = session.play(&path).unwrap();
        assert_eq!(metadata.samplerate, 8_000);
        assert_eq!(metadata.channels, 2);
        assert_eq!(metadata.format, "WAV");
        assert_eq!(metadata.bit_depth, "Signed 16 bit PCM");
        assert!(session.is_playing());
        assert_eq!(backend.live_streams(), 1);

        session.pause().unwrap();
        assert!(!session.is_playing());
        assert!(session.is_paused());

        session.resume().unwrap();
        assert!(session.is_playing());

        session.stop();
        session.stop();
        assert!(!session.is_playing());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn test_stop_cancels_priming() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_test_wav(&path, 8_000, 80_000);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        // Two blocks of ring never satisfy a four-block prefill.
        let engine = EngineSettings {
            prefill_blocks: 4,
            ring_blocks: 2,
            ..EngineSettings::default()
        };
        let mut session = PlaybackSession::new(backend.clone(), device, engine);

        let pending = session.prepare(&path).unwrap();
        assert_eq!(session.state(), SessionState::Priming);
        assert!(!session.is_playing());
        assert_eq!(backend.live_streams(), 1);

        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        let primed = pending.prime();
        assert!(primed.is_err());
        assert!(session.commit(pending, primed).is_err());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn test_commit_of_replaced_stream_is_refused() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("a.wav"), dir.path().join("b.wav"));
        write_test_wav(&a, 8_000, 8_000);
        write_test_wav(&b, 8_000, 8_000);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        let first = session.prepare(&a).unwrap();
        let second = session.prepare(&b).unwrap();
        let primed = first.prime();
        assert!(session.commit(first, primed).is_err());
        assert_eq!(session.state(), SessionState::Priming);

        let primed = second.prime();
        session.commit(second, primed).unwrap();
        assert!(session.is_playing());
        assert_eq!(backend.live_streams(), 1);
    }

    #[test]
    fn test_pause_and_resume_without_stream_are_noops() {
        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend, device, engine());

        session.pause().unwrap();
        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.reap().is_none());
    }

    #[test]
    fn test_play_replaces_live_stream() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("a.wav"), dir.path().join("b.wav"));
        write_test_wav(&a, 8_000, 8_000);
        write_test_wav(&b, 8_000, 8_000);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        session.play(&a).unwrap();
        session.play(&b).unwrap();
        assert_eq!(backend.live_streams(), 1);
        assert_eq!(backend.opened_streams(), 2);
    }

    #[test]
    fn test_unusable_device_opens_no_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 8_000, 800);

        let device = test_device(0, "ALSA", "HDMI");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]).with_rates(&[]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        let result = session.play(&path);
        assert!(matches!(result, Err(PlayerError::DeviceUnusable { .. })));
        assert_eq!(backend.opened_streams(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_unreadable_file_is_configuration_error() {
        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        let result = session.play(Path::new("/nonexistent/a.flac"));
        assert!(matches!(result, Err(PlayerError::ConfigurationError(_))));
        assert_eq!(backend.opened_streams(), 0);
    }

    #[test]
    fn test_probe_is_cached() {
        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]).with_rates(&[96_000]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());

        assert_eq!(session.max_samplerate(2, ExclusiveFlags::empty()), 96_000);
        let queries = backend.probe_queries();
        assert_eq!(session.max_samplerate(2, ExclusiveFlags::empty()), 96_000);
        assert_eq!(backend.probe_queries(), queries);
    }

    #[test]
    fn test_stream_end_is_reaped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_test_wav(&path, 8_000, 1_500);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());
        session.play(&path).unwrap();

        backend.render(4_000);
        assert!(!session.is_playing());
        assert!(session.has_ended());
        assert_eq!(session.reap(), Some(StreamEnd::Completed));
        assert!(session.last_stream_error().is_none());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.live_streams(), 0);
    }

    #[test]
    fn test_device_error_is_reported_as_underflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 8_000, 8_000);

        let device = test_device(0, "ALSA", "DAC");
        let backend = Arc::new(FakeBackend::new(vec![device.clone()]));
        let mut session = PlaybackSession::new(backend.clone(), device, engine());
        session.play(&path).unwrap();

        backend.fail_device();
        backend.render(100);
        assert_eq!(session.reap(), Some(StreamEnd::Underflow));
        assert!(matches!(
            session.last_stream_error(),
            Some(PlayerError::OutputUnderflow { .. })
        ));
    }
}
