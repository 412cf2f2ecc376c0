//! Playback configuration negotiated between a source file and a device.

use std::path::Path;

use tracing::info;

use crate::{
    audio::{
        decoder::{SourceInfo, probe_source},
        device::{Device, ExclusiveFlags},
        sample::SampleFormat,
    },
    config::EngineSettings,
    error::PlayerError,
};

/// Most channels the engine ever outputs.
pub const MAX_OUTPUT_CHANNELS: u16 = 2;

/// Output channel count for a device.
#[must_use]
pub fn output_channels(device: &Device) -> u16 {
    MAX_OUTPUT_CHANNELS.min(device.max_output_channels)
}

/// Everything the filler and the output stream agree on for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfiguration {
    /// Stream sample rate in Hz.
    pub samplerate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Buffer and stream sample format.
    pub sample_format: SampleFormat,
    /// Frames per block; also the requested device buffer size.
    pub block_size: usize,
    /// Blocks buffered before the stream starts.
    pub prefill_blocks: usize,
    /// Ring capacity in blocks.
    pub ring_blocks: usize,
    /// Host-API stream flags.
    pub exclusive_flags: ExclusiveFlags,
    /// The source being played.
    pub source: SourceInfo,
}

impl PlaybackConfiguration {
    /// Opens `path` and negotiates against `device`.
    ///
    /// `max_samplerate` is the device's probed maximum for the channel count
    /// from [`output_channels`].
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::ConfigurationError` if the file cannot be opened
    /// or parsed, and `PlayerError::DeviceUnusable` if `max_samplerate` is 0.
    pub fn build(
        path: &Path,
        device: &Device,
        max_samplerate: u32,
        engine: &EngineSettings,
    ) -> Result<Self, PlayerError> {
        let source = probe_source(path)?;
        Self::negotiate(source, device, max_samplerate, engine)
    }

    /// Negotiates a configuration for an already-probed source.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::DeviceUnusable` if `max_samplerate` is 0.
    pub fn negotiate(
        source: SourceInfo,
        device: &Device,
        max_samplerate: u32,
        engine: &EngineSettings,
    ) -> Result<Self, PlayerError> {
        if max_samplerate == 0 || device.max_output_channels == 0 {
            return Err(PlayerError::DeviceUnusable {
                device: device.name.clone(),
            });
        }

        let samplerate = source.sample_rate.min(max_samplerate);
        let block_size = (samplerate / engine.blocks_per_second.max(1)).max(1) as usize;

        let configuration = Self {
            samplerate,
            channels: output_channels(device),
            sample_format: source.sample_format,
            block_size,
            prefill_blocks: engine.prefill_blocks,
            ring_blocks: engine.ring_blocks,
            exclusive_flags: device.exclusive_flags(engine.exclusive_mode),
            source,
        };

        info!(
            path = %configuration.source.path.display(),
            device = %device.name,
            source_samplerate = configuration.source.sample_rate,
            samplerate = configuration.samplerate,
            channels = configuration.channels,
            sample_format = %configuration.sample_format,
            block_size = configuration.block_size,
            "Negotiated playback configuration"
        );
        Ok(configuration)
    }

    /// Whether the source must be resampled to the stream rate.
    #[must_use]
    pub fn needs_resampling(&self) -> bool {
        self.source.sample_rate != self.samplerate
    }
}

#[cfg(test)]
pub(crate) fn test_source(sample_rate: u32, bits: Option<u32>) -> SourceInfo {
    SourceInfo {
        path: "/music/track.flac".into(),
        sample_rate,
        channels: 2,
        frames: Some(u64::from(sample_rate) * 3),
        bits_per_sample: bits,
        format: "FLAC".to_string(),
        bit_depth: bits.map_or_else(|| "32 bit float".to_string(), |b| format!("Signed {b} bit PCM")),
        sample_format: SampleFormat::for_source(bits, bits.is_some()),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audio::{
            configuration::{PlaybackConfiguration, test_source},
            device::{ExclusiveFlags, test_device},
            sample::SampleFormat,
        },
        config::EngineSettings,
        error::PlayerError,
    };

    #[test]
    fn test_native_rate_kept_when_supported() {
        let device = test_device(0, "ALSA", "DAC");
        let config = PlaybackConfiguration::negotiate(
            test_source(44_100, Some(16)),
            &device,
            192_000,
            &EngineSettings::default(),
        )
        .unwrap();

        assert_eq!(config.samplerate, 44_100);
        assert_eq!(config.block_size, 5_512);
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_format, SampleFormat::I16);
        assert_eq!(config.prefill_blocks, 20);
        assert!(!config.needs_resampling());
        assert!(config.exclusive_flags.is_empty());
    }

    #[test]
    fn test_downsamples_to_device_maximum() {
        let device = test_device(0, "ALSA", "DAC");
        let config = PlaybackConfiguration::negotiate(
            test_source(192_000, Some(24)),
            &device,
            96_000,
            &EngineSettings::default(),
        )
        .unwrap();

        assert_eq!(config.samplerate, 96_000);
        assert_eq!(config.block_size, 12_000);
        assert_eq!(config.sample_format, SampleFormat::I32);
        assert!(config.needs_resampling());
        assert!(config.samplerate <= config.source.sample_rate);
    }

    #[test]
    fn test_zero_probe_is_device_unusable() {
        let device = test_device(0, "ALSA", "HDMI");
        let result = PlaybackConfiguration::negotiate(
            test_source(44_100, Some(16)),
            &device,
            0,
            &EngineSettings::default(),
        );
        assert!(matches!(result, Err(PlayerError::DeviceUnusable { device }) if device == "HDMI"));
    }

    #[test]
    fn test_mono_device_and_exclusive_flags() {
        let mut device = test_device(0, "Windows WASAPI", "Headset");
        device.max_output_channels = 1;
        let config = PlaybackConfiguration::negotiate(
            test_source(48_000, None),
            &device,
            48_000,
            &EngineSettings::default(),
        )
        .unwrap();

        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_format, SampleFormat::F32);
        assert!(config.exclusive_flags.contains(ExclusiveFlags::EXCLUSIVE));

        let shared = EngineSettings {
            exclusive_mode: false,
            ..EngineSettings::default()
        };
        let config =
            PlaybackConfiguration::negotiate(test_source(48_000, None), &device, 48_000, &shared)
                .unwrap();
        assert!(config.exclusive_flags.is_empty());
    }

    #[test]
    fn test_block_size_has_a_floor() {
        let device = test_device(0, "ALSA", "DAC");
        let config = PlaybackConfiguration::negotiate(
            test_source(4, Some(16)),
            &device,
            48_000,
            &EngineSettings::default(),
        )
        .unwrap();
        assert_eq!(config.block_size, 1);
    }
}
