use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("Unknown device '{0}', expected 'cpu', 'cuda', 'gpu' or 'cuda:N'")]
pub struct DeviceError(String);

/// Where tensors live during evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    /// The nth discrete GPU.
    Gpu(usize),
}

impl FromStr for ComputeDevice {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let err = || DeviceError(s.to_owned());

        match name.split_once(':') {
            None => match name.as_str() {
                "cpu" => Ok(Self::Cpu),
                "cuda" | "gpu" | "wgpu" => Ok(Self::Gpu(0)),
                _ => Err(err()),
            },
            Some(("cuda" | "gpu", index)) => index.parse().map(Self::Gpu).map_err(|_| err()),
            Some(_) => Err(err()),
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}
