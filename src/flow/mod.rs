mod coupling;
mod layers;
mod model;

pub use coupling::{Coupling, CouplingConfig};
pub use layers::{Flow, FlowConfig};
pub use model::{ALPHA, FlowModel, FlowModelConfig, MAX_PIXEL, N_BINS};

/// Which way an invertible transform is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data towards latent space, accumulating the log-determinant.
    Forward,
    /// Latent towards data space.
    Inverse,
}
