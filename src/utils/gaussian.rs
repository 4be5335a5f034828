use burn::prelude::*;
use burn::tensor::Distribution;
use std::f64::consts::PI;

/// Elementwise log-density of the standard Gaussian, `log N(x | 0, 1) = -(ln 2π + x²) / 2`.
pub fn log_prior<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    (x.square() + (2. * PI).ln()) * -0.5
}

/// Draws a standard Gaussian tensor of the given shape.
pub fn sample_prior<B: Backend, const D: usize>(
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::random(shape, Distribution::Normal(0., 1.), device)
}
