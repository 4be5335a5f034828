use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid IDX file {path:?}: {reason}")]
    InvalidIdx { path: PathBuf, reason: String },

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid arguments: {0}")]
    Args(#[from] pico_args::Error),

    #[error("unused arguments: {0:?}")]
    UnusedArguments(Vec<OsString>),

    #[error("device {0:?} is not supported by the compiled backend")]
    UnsupportedDevice(String),

    #[error("tensor data conversion failed: {0}")]
    TensorData(String),

    #[error("statistics error: {0}")]
    Stats(#[from] statrs::StatsError),

    #[error("expected flattened 28x28 images of {expected} pixels, got {got}")]
    ImageSize { expected: usize, got: usize },

    #[error("the latent manifold needs z_dim = 2, got {0}")]
    ManifoldDim(usize),

    #[error("non-finite {metric} at epoch {epoch}, batch {batch}")]
    NonFinite {
        metric: &'static str,
        epoch: usize,
        batch: usize,
    },

    #[error("epoch {0} had no batches")]
    EmptyEpoch(usize),
}
