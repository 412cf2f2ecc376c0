//! Audio output through the `cpal` crate.
//!
//! cpal streams are not `Send` on every platform, so each stream is built and
//! owned by a dedicated worker thread. The session talks to that thread over a
//! command channel and waits for every reply, which keeps start, pause and
//! stop synchronous.

use std::thread::{Builder, JoinHandle};

use {
    async_channel::{Receiver, Sender, bounded, unbounded},
    cpal::{
        BufferSize, OutputCallbackInfo, SampleFormat as CpalSampleFormat, Stream, StreamConfig,
        SupportedBufferSize, available_hosts, host_from_id,
        traits::{DeviceTrait, HostTrait, StreamTrait},
    },
    tracing::{debug, error, warn},
};

use crate::{
    audio::{
        backend::{AudioBackend, OutputHandle, Renderer},
        configuration::PlaybackConfiguration,
        device::{Device, ExclusiveFlags, HostApi},
        sample::{PcmSample, SampleFormat},
        stream::StreamCursor,
    },
    error::PlayerError,
};

/// The system audio backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates the backend. No device is opened until a stream is requested.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn host_apis(&self) -> Result<Vec<HostApi>, PlayerError> {
        Ok(enumerate_host_apis())
    }

    fn supports_output(
        &self,
        device: &Device,
        channels: u16,
        samplerate: u32,
        _flags: ExclusiveFlags,
    ) -> bool {
        let Some(cpal_device) = resolve_device(device) else {
            return false;
        };
        match cpal_device.supported_output_configs() {
            Ok(mut ranges) => ranges.any(|range| {
                range.channels() == channels
                    && range.min_sample_rate() <= samplerate
                    && samplerate <= range.max_sample_rate()
            }),
            Err(e) => {
                debug!(device = %device.name, error = %e, "Cannot query output configurations");
                false
            }
        }
    }

    fn open_output(
        &self,
        device: &Device,
        config: &PlaybackConfiguration,
        renderer: Renderer,
    ) -> Result<Box<dyn OutputHandle>, PlayerError> {
        let (commands, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let request = StreamRequest {
            device: device.clone(),
            channels: config.channels,
            samplerate: config.samplerate,
            block_size: u32::try_from(config.block_size).unwrap_or(u32::MAX),
        };

        let worker = Builder::new()
            .name("output-stream".to_string())
            .spawn(move || stream_worker(request, renderer, command_rx, ready_tx))
            .map_err(|e| PlayerError::Backend {
                reason: format!("Cannot spawn output thread: {e}"),
            })?;

        let opened = ready_rx.recv_blocking().map_err(|_| PlayerError::Backend {
            reason: "Output thread exited before opening the stream".to_string(),
        });
        match opened.and_then(|result| result) {
            Ok(()) => Ok(Box::new(CpalOutput {
                commands,
                worker: Some(worker),
            })),
            Err(e) => {
                let _ = worker.join();
                Err(e)
            }
        }
    }
}

struct StreamRequest {
    device: Device,
    channels: u16,
    samplerate: u32,
    block_size: u32,
}

enum StreamCommand {
    Start(Sender<Result<(), PlayerError>>),
    Pause(Sender<Result<(), PlayerError>>),
    Stop,
}

/// Handle to a stream owned by an output worker thread.
struct CpalOutput {
    commands: Sender<StreamCommand>,
    worker: Option<JoinHandle<()>>,
}

impl CpalOutput {
    fn request(
        &self,
        command: fn(Sender<Result<(), PlayerError>>) -> StreamCommand,
    ) -> Result<(), PlayerError> {
        let (reply_tx, reply_rx) = bounded(1);
        let gone = || PlayerError::Backend {
            reason: "Output stream is closed".to_string(),
        };
        self.commands
            .send_blocking(command(reply_tx))
            .map_err(|_| gone())?;
        reply_rx.recv_blocking().map_err(|_| gone())?
    }
}

impl OutputHandle for CpalOutput {
    fn start(&mut self) -> Result<(), PlayerError> {
        self.request(StreamCommand::Start)
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.request(StreamCommand::Pause)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send_blocking(StreamCommand::Stop);
            if worker.join().is_err() {
                error!("Output stream thread panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_worker(
    request: StreamRequest,
    renderer: Renderer,
    commands: Receiver<StreamCommand>,
    ready: Sender<Result<(), PlayerError>>,
) {
    let stream = match build_stream(&request, renderer) {
        Ok(stream) => {
            let _ = ready.send_blocking(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send_blocking(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv_blocking() {
        match command {
            StreamCommand::Start(reply) => {
                let result = stream.play().map_err(|e| PlayerError::Backend {
                    reason: format!("Cannot start stream: {e}"),
                });
                let _ = reply.send_blocking(result);
            }
            StreamCommand::Pause(reply) => {
                let result = stream.pause().map_err(|e| PlayerError::Backend {
                    reason: format!("Cannot pause stream: {e}"),
                });
                let _ = reply.send_blocking(result);
            }
            StreamCommand::Stop => break,
        }
    }

    if let Err(e) = stream.pause() {
        debug!(error = %e, "Pausing stream before close failed");
    }
    drop(stream);
    debug!(device = %request.device.name, "Output stream closed");
}

fn build_stream(request: &StreamRequest, renderer: Renderer) -> Result<Stream, PlayerError> {
    let device = resolve_device(&request.device).ok_or_else(|| PlayerError::Backend {
        reason: format!("Output device {} is no longer available", request.device.name),
    })?;

    let format = cpal_sample_format(renderer.sample_format());
    let buffer_size = device
        .supported_output_configs()
        .ok()
        .and_then(|mut ranges| {
            ranges.find(|range| {
                range.channels() == request.channels
                    && range.sample_format() == format
                    && range.min_sample_rate() <= request.samplerate
                    && request.samplerate <= range.max_sample_rate()
            })
        })
        .map_or(BufferSize::Default, |range| match range.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&request.block_size) =>
            {
                BufferSize::Fixed(request.block_size)
            }
            _ => BufferSize::Default,
        });

    let config = StreamConfig {
        channels: request.channels,
        sample_rate: request.samplerate,
        buffer_size,
    };
    debug!(
        device = %request.device.name,
        ?config,
        %format,
        "Building output stream"
    );

    match renderer {
        Renderer::I16(cursor) => build_typed(&device, &config, cursor),
        Renderer::I32(cursor) => build_typed(&device, &config, cursor),
        Renderer::F32(cursor) => build_typed(&device, &config, cursor),
    }
}

fn build_typed<S: PcmSample>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut cursor: StreamCursor<S>,
) -> Result<Stream, PlayerError> {
    let status = cursor.status();
    let err_fn = move |err| {
        error!("Output stream error: {err}");
        status.flag_device_error();
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [S], _: &OutputCallbackInfo| cursor.render(data),
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::Backend {
            reason: format!("Cannot open output stream: {e}"),
        })
}

fn cpal_sample_format(format: SampleFormat) -> CpalSampleFormat {
    match format {
        SampleFormat::I16 => CpalSampleFormat::I16,
        SampleFormat::I32 => CpalSampleFormat::I32,
        SampleFormat::F32 => CpalSampleFormat::F32,
    }
}

/// Snapshot of every host API and its output devices.
///
/// Device indices are global across host APIs, in enumeration order.
fn enumerate_host_apis() -> Vec<HostApi> {
    let mut catalog = Vec::new();
    let mut next_index = 0;

    for host_id in available_hosts() {
        let host = match host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                warn!(host = host_id.name(), error = %e, "Host API unavailable");
                continue;
            }
        };

        let api_index = catalog.len();
        let default_name = host
            .default_output_device()
            .and_then(|device| device.description().ok())
            .map(|description| description.name().to_string());

        let mut devices = Vec::new();
        if let Ok(outputs) = host.output_devices() {
            for cpal_device in outputs {
                let index = next_index;
                next_index += 1;
                if let Some(device) =
                    describe_device(&cpal_device, index, api_index, host_id.name())
                {
                    devices.push(Device {
                        is_default_output_device: default_name.as_deref()
                            == Some(device.name.as_str()),
                        ..device
                    });
                }
            }
        }

        catalog.push(HostApi {
            index: api_index,
            name: host_id.name().to_string(),
            devices,
        });
    }
    catalog
}

fn describe_device(
    device: &cpal::Device,
    index: usize,
    host_api_index: usize,
    host_api_name: &str,
) -> Option<Device> {
    let name = device.description().ok()?.name().to_string();
    let max_output_channels = device
        .supported_output_configs()
        .ok()?
        .map(|range| range.channels())
        .max()
        .unwrap_or(0);
    if max_output_channels == 0 {
        return None;
    }

    let (default_samplerate, low, high) = match device.default_output_config() {
        Ok(config) => {
            let rate = config.sample_rate();
            let (low, high) = match config.buffer_size() {
                SupportedBufferSize::Range { min, max } => (
                    f64::from(*min) / f64::from(rate.max(1)),
                    f64::from(*max) / f64::from(rate.max(1)),
                ),
                SupportedBufferSize::Unknown => (0.0, 0.0),
            };
            (rate, low, high)
        }
        Err(_) => (0, 0.0, 0.0),
    };

    Some(Device {
        index,
        name,
        host_api_index,
        host_api_name: host_api_name.to_string(),
        max_output_channels,
        default_low_output_latency: low,
        default_high_output_latency: high,
        default_samplerate,
        is_default_output_device: false,
    })
}

/// Finds the live cpal device behind a catalog entry.
///
/// The global index is tried first; if the device list changed since the
/// snapshot, the first device with the same name on the same host wins.
fn resolve_device(device: &Device) -> Option<cpal::Device> {
    let mut index = 0;
    let mut by_name = None;

    for host_id in available_hosts() {
        let Ok(host) = host_from_id(host_id) else {
            continue;
        };
        let Ok(outputs) = host.output_devices() else {
            continue;
        };
        let same_host = host_id.name() == device.host_api_name;

        for candidate in outputs {
            let name_matches = same_host
                && candidate
                    .description()
                    .is_ok_and(|description| description.name() == device.name);
            if name_matches && index == device.index {
                return Some(candidate);
            }
            if name_matches && by_name.is_none() {
                by_name = Some(candidate);
            }
            index += 1;
        }
    }
    by_name
}
