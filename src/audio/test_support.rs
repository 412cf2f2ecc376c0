//! In-memory audio backend and fixtures for tests.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering::SeqCst},
    },
    thread::{sleep, spawn},
    time::Duration,
};

use {
    hound::{SampleFormat as HoundFormat, WavSpec, WavWriter},
    parking_lot::Mutex,
};

use crate::{
    audio::{
        backend::{AudioBackend, OutputHandle, Renderer},
        configuration::PlaybackConfiguration,
        device::{Device, ExclusiveFlags, HostApi},
        stream::StreamStatus,
    },
    error::PlayerError,
};

/// Writes a stereo 16-bit WAV of `frames` frames.
pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, frames: usize) {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: HoundFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for frame in 0..frames {
        let sample = ((frame % 64) as i16 - 32) * 256;
        writer.write_sample(sample).unwrap();
        writer.write_sample(-sample).unwrap();
    }
    writer.finalize().unwrap();
}

struct FakeStream {
    renderer: Renderer,
    channels: usize,
    running: bool,
}

#[derive(Default)]
struct FakeState {
    streams: HashMap<usize, FakeStream>,
    opened: usize,
}

impl FakeState {
    fn render(&mut self, frames: usize) {
        for stream in self.streams.values_mut().filter(|stream| stream.running) {
            let samples = frames * stream.channels;
            match &mut stream.renderer {
                Renderer::I16(cursor) => cursor.render(&mut vec![0; samples]),
                Renderer::I32(cursor) => cursor.render(&mut vec![0; samples]),
                Renderer::F32(cursor) => cursor.render(&mut vec![0.0; samples]),
            }
        }
    }
}

fn renderer_status(renderer: &Renderer) -> Arc<StreamStatus> {
    match renderer {
        Renderer::I16(cursor) => cursor.status(),
        Renderer::I32(cursor) => cursor.status(),
        Renderer::F32(cursor) => cursor.status(),
    }
}

/// Backend with a fixed device list and a table of accepted sample rates.
///
/// Streams only advance when `render` is called, or on a background clock
/// started with `with_clock`.
pub(crate) struct FakeBackend {
    catalog: Vec<HostApi>,
    rates: Vec<u32>,
    state: Arc<Mutex<FakeState>>,
    probe_queries: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new(devices: Vec<Device>) -> Self {
        let mut catalog: Vec<HostApi> = Vec::new();
        for device in devices {
            match catalog
                .iter_mut()
                .find(|api| api.name == device.host_api_name)
            {
                Some(api) => api.devices.push(device),
                None => catalog.push(HostApi {
                    index: catalog.len(),
                    name: device.host_api_name.clone(),
                    devices: vec![device],
                }),
            }
        }

        Self {
            catalog,
            rates: vec![44_100, 48_000, 88_200, 96_000, 192_000],
            state: Arc::new(Mutex::new(FakeState::default())),
            probe_queries: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    /// Renders `frames` frames every `period` until the backend is dropped.
    pub(crate) fn with_clock(self, period: Duration, frames: usize) -> Self {
        let state: Weak<Mutex<FakeState>> = Arc::downgrade(&self.state);
        spawn(move || {
            while let Some(state) = state.upgrade() {
                state.lock().render(frames);
                drop(state);
                sleep(period);
            }
        });
        self
    }

    pub(crate) fn render(&self, frames: usize) {
        self.state.lock().render(frames);
    }

    pub(crate) fn fail_device(&self) {
        for stream in self.state.lock().streams.values() {
            renderer_status(&stream.renderer).flag_device_error();
        }
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub(crate) fn opened_streams(&self) -> usize {
        self.state.lock().opened
    }

    pub(crate) fn probe_queries(&self) -> usize {
        self.probe_queries.load(SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn host_apis(&self) -> Result<Vec<HostApi>, PlayerError> {
        Ok(self.catalog.clone())
    }

    fn supports_output(
        &self,
        device: &Device,
        channels: u16,
        samplerate: u32,
        _flags: ExclusiveFlags,
    ) -> bool {
        self.probe_queries.fetch_add(1, SeqCst);
        channels <= device.max_output_channels && self.rates.contains(&samplerate)
    }

    fn open_output(
        &self,
        _device: &Device,
        config: &PlaybackConfiguration,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputHandle>, PlayerError> {
        let mut state = self.state.lock();
        let id = state.opened;
        state.opened += 1;
        state.streams.insert(
            id,
            FakeStream {
                renderer,
                channels: usize::from(config.channels),
                running: false,
            },
        );

        Ok(Box::new(FakeOutput {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeOutput {
    id: usize,
    state: Arc<Mutex<FakeState>>,
}

impl FakeOutput {
    fn set_running(&self, running: bool) -> Result<(), PlayerError> {
        match self.state.lock().streams.get_mut(&self.id) {
            Some(stream) => {
                stream.running = running;
                Ok(())
            }
            None => Err(PlayerError::Backend {
                reason: "stream closed".to_string(),
            }),
        }
    }
}

impl OutputHandle for FakeOutput {
    fn start(&mut self) -> Result<(), PlayerError> {
        self.set_running(true)
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.set_running(false)
    }

    fn stop(&mut self) {
        self.state.lock().streams.remove(&self.id);
    }
}
