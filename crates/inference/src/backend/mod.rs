use crate::{labels::LabelTable, types::EngineOutput};
use image::RgbImage;
use serde::Serialize;
use std::{fmt, str::FromStr};

pub mod mock;
#[cfg(feature = "ort-backend")]
pub mod ort;

/// Compute device a detection engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested device; `Auto` picks CUDA when the execution provider is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelection {
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DeviceSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => anyhow::bail!("unsupported device `{other}`, use auto, cpu or cuda"),
        }
    }
}

/// A loaded object detector.
///
/// Shared read-only across worker threads, so `detect` takes `&self`;
/// implementations that need exclusive access serialise internally.
pub trait DetectionEngine: Send + Sync + 'static {
    fn device(&self) -> Device;

    fn labels(&self) -> &LabelTable;

    /// Run one forward pass on a decoded RGB image.
    fn detect(&self, image: &RgbImage, confidence_threshold: f32)
    -> anyhow::Result<EngineOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_selection_parsing() {
        assert_eq!("AUTO".parse::<DeviceSelection>().unwrap(), DeviceSelection::Auto);
        assert_eq!("gpu".parse::<DeviceSelection>().unwrap(), DeviceSelection::Cuda);
        assert_eq!("cpu".parse::<DeviceSelection>().unwrap(), DeviceSelection::Cpu);
        assert!("tpu".parse::<DeviceSelection>().is_err());
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert_eq!(Device::Cpu.as_str(), "cpu");
    }
}
