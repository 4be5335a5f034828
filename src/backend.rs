//! Compile-time backend selection and device parsing.
//!
//! `ndarray` is the default; enabling `wgpu`, `tch` or `cuda` takes precedence over it.

use crate::error::{Error, Result};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

#[cfg(feature = "f16")]
pub type Element = burn::tensor::f16;
#[cfg(not(feature = "f16"))]
pub type Element = f32;

#[cfg(feature = "cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;
#[cfg(all(feature = "tch", not(feature = "cuda")))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element>;
#[cfg(all(feature = "wgpu", not(any(feature = "cuda", feature = "tch"))))]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(not(any(feature = "cuda", feature = "tch", feature = "wgpu")))]
pub type MainBackend = burn::backend::NdArray<Element, i32>;

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;

#[cfg(not(any(feature = "ndarray", feature = "wgpu", feature = "tch", feature = "cuda")))]
std::compile_error!(
    "No backend selected. Enable one of the `ndarray`, `wgpu`, `tch` or `cuda` features."
);

/// Parses the `--device` strings: `cpu`, `cuda:N`, `gpu:N`, `mps` or `default`.
pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }

    fn parse_device(name: &str) -> Result<<Self as Backend>::Device>;
}

/// `"cuda:1"` with prefix `"cuda"` gives `Some(1)`, a bare `"cuda"` gives `Some(0)`.
pub fn device_index(name: &str, prefix: &str) -> Option<usize> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(0);
    }
    rest.strip_prefix(':')?.parse().ok()
}

fn unsupported<T>(name: &str) -> Result<T> {
    Err(Error::UnsupportedDevice(name.to_string()))
}

#[cfg(not(any(feature = "cuda", feature = "tch", feature = "wgpu")))]
impl MainDevice for MainBackend {
    fn parse_device(name: &str) -> Result<<Self as Backend>::Device> {
        match name {
            "cpu" | "default" => Ok(burn::backend::ndarray::NdArrayDevice::Cpu),
            _ => unsupported(name),
        }
    }
}

#[cfg(all(feature = "wgpu", not(any(feature = "cuda", feature = "tch"))))]
impl MainDevice for MainBackend {
    fn parse_device(name: &str) -> Result<<Self as Backend>::Device> {
        use burn::backend::wgpu::WgpuDevice;
        match name {
            "default" => Ok(WgpuDevice::DefaultDevice),
            "cpu" => Ok(WgpuDevice::Cpu),
            _ => match device_index(name, "gpu").or_else(|| device_index(name, "cuda")) {
                Some(index) => Ok(WgpuDevice::DiscreteGpu(index)),
                None => unsupported(name),
            },
        }
    }
}

#[cfg(all(feature = "tch", not(feature = "cuda")))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cpu
    }

    fn parse_device(name: &str) -> Result<<Self as Backend>::Device> {
        use burn::backend::libtorch::LibTorchDevice;
        match name {
            "cpu" | "default" => Ok(LibTorchDevice::Cpu),
            "mps" => Ok(LibTorchDevice::Mps),
            _ => match device_index(name, "cuda").or_else(|| device_index(name, "gpu")) {
                Some(index) => Ok(LibTorchDevice::Cuda(index)),
                None => unsupported(name),
            },
        }
    }
}

#[cfg(feature = "cuda")]
impl MainDevice for MainBackend {
    fn parse_device(name: &str) -> Result<<Self as Backend>::Device> {
        use burn::backend::cuda::CudaDevice;
        match name {
            "default" => Ok(CudaDevice::default()),
            _ => match device_index(name, "cuda").or_else(|| device_index(name, "gpu")) {
                Some(index) => Ok(CudaDevice::new(index)),
                None => unsupported(name),
            },
        }
    }
}

impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }

    fn parse_device(name: &str) -> Result<<Self as Backend>::Device> {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::parse_device(name)
    }
}
