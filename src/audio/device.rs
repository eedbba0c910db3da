//! Audio device enumeration
//!
//! Output devices are addressed by their position in the host's output
//! device list, which is what the UI sends back as `device_index`.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// List output devices in host enumeration order
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = match host.output_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate output devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = get_device_capabilities(&device, false);
            Some(AudioDeviceInfo {
                index,
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

/// List input devices, for the sender's `--list-devices`
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let (sample_rates, channels) = get_device_capabilities(&device, true);
            Some(AudioDeviceInfo {
                index,
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rates,
                channels,
            })
        })
        .collect()
}

/// Sample rates and channel counts a device advertises
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in &configs {
        for rate_val in [44100u32, 48000, 88200, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }

        let ch = config.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    (sample_rates, channels)
}

/// Output device at `index`, or the default output when `None`
pub fn output_device(index: Option<usize>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    match index {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(index) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .nth(index)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("output #{}", index))),
    }
}

/// Input device with exactly `name`, or the default input when `None`
pub fn input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()));
    };

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}
