//! # Device Selection
//!
//! Whisper runs on whatever accelerator the host offers. A preference that
//! names an accelerator the host lacks resolves to the CPU.

use candle_core::Device;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Probing CUDA/Metal initializes a driver context; do it once per process.
static AUTO_DEVICE: OnceLock<Device> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accelerator {
    Cuda,
    Metal,
}

impl Accelerator {
    fn open(self) -> Option<Device> {
        let opened = match self {
            Accelerator::Cuda => Device::new_cuda(0),
            Accelerator::Metal => Device::new_metal(0),
        };
        opened
            .map_err(|e| debug!(accelerator = ?self, "Accelerator unavailable: {}", e))
            .ok()
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let preference = match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" | "" => DevicePreference::Auto,
            "cpu" => DevicePreference::Cpu,
            "cuda" | "gpu" => DevicePreference::Cuda,
            "metal" | "mps" => DevicePreference::Metal,
            other => return Err(format!("Unknown device '{}' (expected auto, cpu, cuda or metal)", other)),
        };
        Ok(preference)
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
            DevicePreference::Metal => "metal",
        })
    }
}

impl DevicePreference {
    /// Lenient parse for config values: unknown names mean `Auto`.
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|e| {
            warn!("{}; falling back to auto", e);
            DevicePreference::Auto
        })
    }

    /// The device to load the model on. Never fails.
    pub fn resolve(self) -> Device {
        let device = match self {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Accelerator::Cuda.open().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Accelerator::Metal.open().unwrap_or(Device::Cpu),
            DevicePreference::Auto => AUTO_DEVICE.get_or_init(probe).clone(),
        };
        if self != DevicePreference::Auto && self != DevicePreference::Cpu && device.is_cpu() {
            warn!("Requested {} device is not available, transcribing on CPU", self);
        }
        device
    }
}

fn probe() -> Device {
    let found = [Accelerator::Cuda, Accelerator::Metal]
        .into_iter()
        .find_map(Accelerator::open);
    match found {
        Some(device) => {
            info!("Auto-selected {} for transcription", device_label(&device));
            device
        }
        None => {
            info!("No GPU found, transcription runs on CPU");
            Device::Cpu
        }
    }
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preferences() {
        for (input, expected) in [
            ("auto", DevicePreference::Auto),
            ("", DevicePreference::Auto),
            (" CPU ", DevicePreference::Cpu),
            ("gpu", DevicePreference::Cuda),
            ("mps", DevicePreference::Metal),
        ] {
            assert_eq!(input.parse::<DevicePreference>().unwrap(), expected, "{:?}", input);
        }
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_unknown_config_value_means_auto() {
        assert_eq!(DevicePreference::from_config("tpu"), DevicePreference::Auto);
        assert_eq!(DevicePreference::from_config("metal"), DevicePreference::Metal);
    }

    #[test]
    fn test_display_round_trips() {
        let preference = DevicePreference::Cuda;
        assert_eq!(preference.to_string().parse::<DevicePreference>().unwrap(), preference);
    }

    #[test]
    fn test_cpu_resolves_to_cpu() {
        let device = DevicePreference::Cpu.resolve();
        assert!(device.is_cpu());
        assert_eq!(device_label(&device), "CPU");
    }
}
