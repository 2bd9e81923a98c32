use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use log::debug;

/// An input device paired with its human-readable name.
pub struct CpalDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub device: cpal::Device,
}

/// Enumerates the host's audio input devices. The default device is listed
/// with `is_default` set so callers can present it first.
pub fn list_input_devices() -> Result<Vec<CpalDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut infos = Vec::new();
    for device in host.input_devices()? {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let is_default = name == default_name;
        infos.push(CpalDeviceInfo {
            name,
            is_default,
            device,
        });
    }

    debug!("Found {} input devices", infos.len());
    Ok(infos)
}

/// Finds an input device by name, falling back to `None` (the default
/// device) when the name is unknown or enumeration fails.
pub fn find_input_device(name: &str) -> Option<cpal::Device> {
    match list_input_devices() {
        Ok(devices) => devices
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.device),
        Err(e) => {
            debug!("Failed to list devices, using default: {}", e);
            None
        }
    }
}
