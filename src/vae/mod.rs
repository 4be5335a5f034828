mod decoder;
mod encoder;
mod model;

pub use decoder::{Decoder, DecoderConfig};
pub use encoder::{Encoder, EncoderConfig};
pub use model::{Vae, VaeConfig, kl_divergence};
