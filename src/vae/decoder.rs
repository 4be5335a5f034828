use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

#[derive(Config, Debug)]
pub struct DecoderConfig {
    #[config(default = 784)]
    pub output_dim: usize,
    #[config(default = 500)]
    pub hidden_dim: usize,
    #[config(default = 20)]
    pub z_dim: usize,
}

impl DecoderConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        Decoder {
            linear1: LinearConfig::new(self.z_dim, self.hidden_dim).init(device),
            linear2: LinearConfig::new(self.hidden_dim, self.output_dim).init(device),
            activation: Relu::new(),
        }
    }
}

/// Bernoulli likelihood `p(x | z)` over every pixel.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> Decoder<B> {
    /// Returns the Bernoulli logits.
    ///
    /// # Shapes
    ///   - Input [batch, z_dim]
    ///   - Output [batch, output_dim]
    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.activation.forward(self.linear1.forward(z));
        self.linear2.forward(h)
    }

    /// Returns the Bernoulli means, in `[0, 1]`.
    ///
    /// # Shapes
    ///   - Input [batch, z_dim]
    ///   - Output [batch, output_dim]
    pub fn mean(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        burn::tensor::activation::sigmoid(self.forward(z))
    }
}
