//! Device capability probing.

use tracing::debug;

use crate::audio::{
    backend::AudioBackend,
    device::{Device, ExclusiveFlags},
};

/// Sample rates tried by the prober, highest first.
pub const CANDIDATE_SAMPLE_RATES: [u32; 9] = [
    384_000, 352_800, 192_000, 176_400, 96_000, 88_200, 48_000, 44_100, 22_050,
];

/// Highest candidate rate the device accepts with `channels` and `flags`.
///
/// Returns 0 when no candidate is accepted. Only validation queries are
/// issued; no stream is opened.
pub fn probe_max_samplerate(
    backend: &dyn AudioBackend,
    device: &Device,
    channels: u16,
    flags: ExclusiveFlags,
) -> u32 {
    let rate = CANDIDATE_SAMPLE_RATES
        .iter()
        .copied()
        .find(|&rate| backend.supports_output(device, channels, rate, flags))
        .unwrap_or(0);

    debug!(
        device = %device.name,
        channels,
        max_samplerate = rate,
        "Probed device capabilities"
    );
    rate
}

#[cfg(test)]
mod tests {
    use crate::audio::{
        device::{ExclusiveFlags, test_device},
        probe::probe_max_samplerate,
        test_support::FakeBackend,
    };

    #[test]
    fn test_probe_returns_highest_accepted_rate() {
        let device = test_device(0, "ALSA", "DAC");
        let backend = FakeBackend::new(vec![device.clone()]).with_rates(&[44_100, 96_000, 48_000]);
        assert_eq!(
            probe_max_samplerate(&backend, &device, 2, ExclusiveFlags::empty()),
            96_000
        );
    }

    #[test]
    fn test_probe_ignores_rates_outside_candidates() {
        let device = test_device(0, "ALSA", "DAC");
        let backend = FakeBackend::new(vec![device.clone()]).with_rates(&[32_000]);
        assert_eq!(
            probe_max_samplerate(&backend, &device, 2, ExclusiveFlags::empty()),
            0
        );
    }

    #[test]
    fn test_probe_respects_channel_count() {
        let mut device = test_device(0, "ALSA", "Mono speaker");
        device.max_output_channels = 1;
        let backend = FakeBackend::new(vec![device.clone()]).with_rates(&[48_000]);
        assert_eq!(
            probe_max_samplerate(&backend, &device, 2, ExclusiveFlags::empty()),
            0
        );
        assert_eq!(
            probe_max_samplerate(&backend, &device, 1, ExclusiveFlags::empty()),
            48_000
        );
    }
}
