use crate::utils::div_eps;
use crate::utils::softplus::softplus;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = 784)]
    pub input_dim: usize,
    #[config(default = 500)]
    pub hidden_dim: usize,
    #[config(default = 20)]
    pub z_dim: usize,
}

impl EncoderConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        Encoder {
            linear1: LinearConfig::new(self.input_dim, self.hidden_dim).init(device),
            linear_mean: LinearConfig::new(self.hidden_dim, self.z_dim).init(device),
            linear_std: LinearConfig::new(self.hidden_dim, self.z_dim).init(device),
            activation: Relu::new(),
        }
    }
}

/// Amortized Gaussian posterior `q(z | x) = N(mean, diag(std²))`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub linear1: Linear<B>,
    pub linear_mean: Linear<B>,
    pub linear_std: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> Encoder<B> {
    /// Returns `(mean, std)`, with `std` strictly positive.
    ///
    /// # Shapes
    ///   - Input [batch, input_dim]
    ///   - Output ([batch, z_dim], [batch, z_dim])
    pub fn forward(&self, input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let h = self.activation.forward(self.linear1.forward(input));

        let mean = self.linear_mean.forward(h.clone());
        // softplus can still underflow to 0 for very negative inputs
        let std = softplus(self.linear_std.forward(h)) + div_eps::<B>();

        (mean, std)
    }
}
