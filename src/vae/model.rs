use crate::error;
use crate::utils::gaussian::sample_prior;
use crate::utils::loss::bce::BinaryCrossEntropyLoss;
use crate::vae::{Decoder, DecoderConfig, Encoder, EncoderConfig};
use burn::prelude::*;
use burn::tensor::Distribution;
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Config, Debug)]
pub struct VaeConfig {
    #[config(default = 784)]
    pub input_dim: usize,
    #[config(default = 500)]
    pub hidden_dim: usize,
    #[config(default = 20)]
    pub z_dim: usize,
}

impl VaeConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vae<B> {
        Vae {
            encoder: EncoderConfig::new()
                .with_input_dim(self.input_dim)
                .with_hidden_dim(self.hidden_dim)
                .with_z_dim(self.z_dim)
                .init(device),
            decoder: DecoderConfig::new()
                .with_output_dim(self.input_dim)
                .with_hidden_dim(self.hidden_dim)
                .with_z_dim(self.z_dim)
                .init(device),
            recon_loss: BinaryCrossEntropyLoss::new(),
            z_dim: self.z_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct Vae<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    pub recon_loss: BinaryCrossEntropyLoss,
    pub z_dim: usize,
}

/// Closed-form `KL(N(mean, std²) || N(0, 1))`, per latent dimension.
///
/// # Shapes
///   - Input mean [batch, z_dim], std [batch, z_dim]
///   - Output [batch, z_dim]
pub fn kl_divergence<B: Backend>(mean: Tensor<B, 2>, std: Tensor<B, 2>) -> Tensor<B, 2> {
    (std.clone().square() + mean.square()) / 2. - std.log() - 0.5
}

impl<B: Backend> Vae<B> {
    /// `z = mean + std * noise`, with `noise ~ N(0, I)`.
    pub fn reparameterize(&self, mean: Tensor<B, 2>, std: Tensor<B, 2>) -> Tensor<B, 2> {
        let noise = sample_prior::<B, 2>(std.dims(), &std.device());
        mean + std * noise
    }

    /// Negative evidence lower bound, averaged over the batch.
    ///
    /// # Shapes
    ///   - Input [batch, input_dim], pixel values in `{0, 1}`
    ///   - Output [1]
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, _input_dim] = input.dims();

        let (mean, std) = self.encoder.forward(input.clone());
        let z = self.reparameterize(mean.clone(), std.clone());
        let logits = self.decoder.forward(z);

        let reconstruction = self.recon_loss.forward_sum(logits, input);
        let regularization = kl_divergence(mean, std).sum_dim(1).reshape([batch]);

        (reconstruction + regularization).mean()
    }

    /// Samples images from the prior, returning `(sampled_ims, im_means)`.
    ///
    /// `sampled_ims` are Bernoulli draws in `{0, 1}`, `im_means` the Bernoulli means in `[0, 1]`.
    ///
    /// # Shapes
    ///   - Output ([n_samples, input_dim], [n_samples, input_dim])
    pub fn sample(&self, n_samples: usize, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let z = sample_prior::<B, 2>([n_samples, self.z_dim], device);
        let im_means = self.decoder.mean(z);

        let uniform = Tensor::random(im_means.shape(), Distribution::Uniform(0., 1.), device);
        let sampled_ims = uniform.lower(im_means.clone()).float();

        (sampled_ims, im_means)
    }

    /// Decoder means over a `grid x grid` lattice of the 2-d latent space.
    ///
    /// The lattice points are the standard normal quantiles of `(k + 0.5) / grid`, so they are
    /// spaced by probability mass rather than by distance. Rows vary the second latent
    /// coordinate, columns the first.
    ///
    /// # Shapes
    ///   - Output [grid * grid, input_dim]
    pub fn manifold(&self, grid: usize, device: &B::Device) -> error::Result<Tensor<B, 2>> {
        if self.z_dim != 2 {
            return Err(error::Error::ManifoldDim(self.z_dim));
        }
        let normal = Normal::new(0., 1.)?;
        let quantiles: Vec<f64> = (0..grid)
            .map(|k| normal.inverse_cdf((k as f64 + 0.5) / grid as f64))
            .collect();

        let points: Vec<f32> = quantiles
            .iter()
            .rev()
            .flat_map(|&z2| quantiles.iter().flat_map(move |&z1| [z1 as f32, z2 as f32]))
            .collect();
        let data = TensorData::new(points, [grid * grid, 2]).convert::<B::FloatElem>();
        let z = Tensor::from_data(data, device);

        Ok(self.decoder.mean(z))
    }
}
