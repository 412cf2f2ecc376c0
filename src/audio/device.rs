//! Output device catalog types.
//!
//! A catalog is an immutable snapshot of the host audio APIs and their
//! output-capable devices, in enumeration order. Snapshots are plain data and
//! can be shared between threads without locking.

use std::fmt::{Display, Formatter, Result as FmtResult};

use {
    bitflags::bitflags,
    serde::{Deserialize, Serialize},
};

/// Name of the host API that supports exclusive polling mode.
pub const EXCLUSIVE_POLLING_HOST_API: &str = "WASAPI";

bitflags! {
    /// Host-API specific stream flags for exclusive device access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ExclusiveFlags: u8 {
        /// Sole ownership of the device.
        const EXCLUSIVE = 0b0000_0001;
        /// Device-driven polling instead of event callbacks.
        const POLLING = 0b0000_0010;
        /// Raise the audio thread priority.
        const THREAD_PRIORITY = 0b0000_0100;
    }
}

/// An output device as seen in one enumeration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable handle into the audio subsystem for this snapshot.
    pub index: usize,
    /// Display name.
    pub name: String,
    /// Index of the owning host API in the catalog.
    pub host_api_index: usize,
    /// Name of the owning host API.
    pub host_api_name: String,
    /// Maximum number of output channels.
    pub max_output_channels: u16,
    /// Default low output latency in seconds.
    pub default_low_output_latency: f64,
    /// Default high output latency in seconds.
    pub default_high_output_latency: f64,
    /// Default sample rate in Hz.
    pub default_samplerate: u32,
    /// Whether this is the host API's default output device.
    pub is_default_output_device: bool,
}

impl Device {
    /// Exclusive-mode flags for this device's host API.
    ///
    /// Only the host API known to support exclusive polling mode gets flags;
    /// every other host API gets none.
    #[must_use]
    pub fn exclusive_flags(&self, exclusive_mode: bool) -> ExclusiveFlags {
        if exclusive_mode && self.host_api_name.contains(EXCLUSIVE_POLLING_HOST_API) {
            ExclusiveFlags::EXCLUSIVE | ExclusiveFlags::POLLING | ExclusiveFlags::THREAD_PRIORITY
        } else {
            ExclusiveFlags::empty()
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "Device ({}) - id: {}, name: {}, max_output_channels: {}, default_low_output_latency: {:.4}, default_high_output_latency: {:.4}, default_samplerate: {}",
            self.host_api_name,
            self.index,
            self.name,
            self.max_output_channels,
            self.default_low_output_latency,
            self.default_high_output_latency,
            self.default_samplerate
        )
    }
}

/// A host audio API and its output devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostApi {
    /// Position in the catalog.
    pub index: usize,
    /// Host API name.
    pub name: String,
    /// Output devices in enumeration order.
    pub devices: Vec<Device>,
}

impl HostApi {
    /// The default output device, if the host API reports one.
    #[must_use]
    pub fn default_output_device(&self) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_default_output_device)
    }
}

impl Display for HostApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.default_output_device() {
            Some(device) => write!(
                f,
                "Host: {}, default output device: [{}]",
                self.name, device.name
            ),
            None => write!(f, "Host: {}, default output device: [none]", self.name),
        }
    }
}

/// Finds an output device by host API and device name substrings.
///
/// Matching is case-insensitive. An empty `host_api` matches every host API.
#[must_use]
pub fn find_output_device<'a>(
    catalog: &'a [HostApi],
    host_api: &str,
    device_name: &str,
) -> Option<&'a Device> {
    catalog
        .iter()
        .filter(|api| host_api.is_empty() || matches_name(&api.name, host_api))
        .flat_map(|api| api.devices.iter())
        .find(|device| matches_name(&device.name, device_name))
}

/// Picks the device to use when nothing was requested: the first host API's
/// default device, otherwise the first device found.
#[must_use]
pub fn default_output_device(catalog: &[HostApi]) -> Option<&Device> {
    catalog
        .iter()
        .find_map(HostApi::default_output_device)
        .or_else(|| catalog.iter().flat_map(|api| api.devices.iter()).next())
}

fn matches_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
pub(crate) fn test_device(index: usize, host_api_name: &str, name: &str) -> Device {
    Device {
        index,
        name: name.to_string(),
        host_api_index: 0,
        host_api_name: host_api_name.to_string(),
        max_output_channels: 2,
        default_low_output_latency: 0.01,
        default_high_output_latency: 0.1,
        default_samplerate: 48_000,
        is_default_output_device: false,
    }
}
