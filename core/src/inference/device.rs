//! Device specification and accelerator availability checks.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Caffe2Error, Result};

/// Device specification for model inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device.
    Cpu,
    /// CUDA accelerator with index.
    Accelerator(usize),
}

impl Device {
    /// Create a CPU device.
    pub fn cpu() -> Self {
        Self::Cpu
    }

    /// Create an accelerator device with the given index.
    pub fn accelerator(index: usize) -> Self {
        Self::Accelerator(index)
    }

    /// The kind passed across the native boundary.
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Cpu => DeviceKind::Cpu,
            Self::Accelerator(_) => DeviceKind::Cuda,
        }
    }
}

impl FromStr for Device {
    type Err = Caffe2Error;

    /// Parse a device string like "cpu", "cuda", "cuda:0", "gpu:1".
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        if s == "cuda" || s == "gpu" {
            return Ok(Self::Accelerator(0));
        }
        match s.strip_prefix("cuda:").or_else(|| s.strip_prefix("gpu:")) {
            Some(idx) => {
                let index: usize = idx
                    .parse()
                    .map_err(|_| Caffe2Error::config(format!("Invalid device index: {}", idx)))?;
                Ok(Self::Accelerator(index))
            }
            None => Err(Caffe2Error::config(format!("Invalid device: {}", s))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

/// Device kind as understood by the native bridge.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu = 0,
    Cuda = 1,
}

/// Reports whether accelerator hardware is present.
///
/// Implementations must be side-effect free; the selector may call them any
/// number of times.
pub trait HardwareProbe: Send + Sync {
    /// Whether the accelerator with `index` can be used.
    fn accelerator_available(&self, index: usize) -> bool;
}

/// A fixed answer, for callers that probe hardware themselves.
impl HardwareProbe for bool {
    fn accelerator_available(&self, _index: usize) -> bool {
        *self
    }
}

impl<F> HardwareProbe for F
where
    F: Fn(usize) -> bool + Send + Sync,
{
    fn accelerator_available(&self, index: usize) -> bool {
        self(index)
    }
}

/// Probes the local machine for NVIDIA devices.
///
/// Always reports no accelerator unless the crate was built with the `cuda`
/// feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn accelerator_available(&self, index: usize) -> bool {
        if !cfg!(feature = "cuda") {
            return false;
        }
        Path::new(&format!("/dev/nvidia{}", index)).exists()
    }
}

/// Resolves requested devices against hardware availability.
#[derive(Clone)]
pub struct DeviceSelector {
    probe: Arc<dyn HardwareProbe>,
}

impl DeviceSelector {
    /// Create a selector backed by `probe`.
    pub fn new(probe: Arc<dyn HardwareProbe>) -> Self {
        Self { probe }
    }

    /// Resolve `requested`, failing closed when an accelerator is missing.
    pub fn resolve(&self, requested: Device) -> Result<Device> {
        match requested {
            Device::Cpu => Ok(Device::Cpu),
            Device::Accelerator(index) => {
                if self.probe.accelerator_available(index) {
                    debug!("Accelerator {} available", index);
                    Ok(requested)
                } else {
                    Err(Caffe2Error::DeviceUnavailable(requested))
                }
            }
        }
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(Arc::new(SystemProbe))
    }
}

impl fmt::Debug for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSelector").finish_non_exhaustive()
    }
}
