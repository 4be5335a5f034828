pub mod backend;
pub mod cli;
pub mod data;
pub mod error;
#[cfg(feature = "flow")]
pub mod flow;
pub mod report;
pub mod training;
pub mod utils;
#[cfg(feature = "vae")]
pub mod vae;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::backend::{MainAutoBackend, MainBackend, MainDevice};
    pub use crate::data::mnist::{MnistBatch, MnistBatcher, MnistDataset, MnistItem, PixelFormat};
    pub use crate::report::Curves;
    pub use crate::training::Mode;

    #[cfg(feature = "flow")]
    pub use crate::flow::*;
    #[cfg(feature = "flow")]
    pub use crate::training::flow::FlowTrainingConfig;

    #[cfg(feature = "vae")]
    pub use crate::training::vae::VaeTrainingConfig;
    #[cfg(feature = "vae")]
    pub use crate::vae::*;
}
