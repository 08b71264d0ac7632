use anyhow::{Context, Result, anyhow};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device with the given name, or the host's default input device.
pub fn get_or_default_input(device_name: Option<&str>) -> Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"));
    };

    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No input device named {target}"))
}

/// Finds the output device with the given name, or the host's default output device.
pub fn get_or_default_output(device_name: Option<&str>) -> Result<Device> {
    let host = get_host();
    let Some(target) = device_name else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("Failed to enumerate output devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No output device named {target}"))
}

fn describe(name: String, channels: u16, rate: u32, is_default: bool) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, rate);
    if is_default {
        d.push_str(" [default]");
    }
    d
}

/// Lists input devices with their default configuration, one per line.
pub fn get_available_inputs() -> Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_input_config() else {
            tracing::debug!("Skipping input device without default config: {}", name);
            continue;
        };
        let is_default = default_name.as_deref() == Some(name.as_str());
        device_names.push(describe(name, cfg.channels(), cfg.sample_rate().0, is_default));
    }
    Ok(device_names.join("\n"))
}

/// Lists output devices with their default configuration, one per line.
pub fn get_available_outputs() -> Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_output_config() else {
            tracing::debug!("Skipping output device without default config: {}", name);
            continue;
        };
        let is_default = default_name.as_deref() == Some(name.as_str());
        device_names.push(describe(name, cfg.channels(), cfg.sample_rate().0, is_default));
    }
    Ok(device_names.join("\n"))
}
