use crate::flow::{Direction, Flow, FlowConfig};
use crate::utils::gaussian::{log_prior, sample_prior};
use crate::utils::log_sigmoid::log_sigmoid;
use burn::prelude::*;
use burn::tensor::Distribution;

/// Number of discrete pixel levels; dequantized pixels live in `[0, N_BINS)`.
pub const N_BINS: f64 = 256.;
/// Shrinks normalized pixels towards 0.5 so that the logit never sees 0 or 1.
pub const ALPHA: f64 = 1e-5;
/// Largest pixel value returned by [`FlowModel::sample`].
pub const MAX_PIXEL: f64 = N_BINS - 1e-3;

#[derive(Config, Debug)]
pub struct FlowModelConfig {
    #[config(default = "FlowConfig::new()")]
    pub flow: FlowConfig,
}

impl FlowModelConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> FlowModel<B> {
        FlowModel {
            flow: self.flow.init(device),
        }
    }
}

/// Dequantization and logit normalization around a [`Flow`], with a standard Gaussian prior.
#[derive(Module, Debug)]
pub struct FlowModel<B: Backend> {
    pub flow: Flow<B>,
}

impl<B: Backend> FlowModel<B> {
    pub fn dim(&self) -> usize {
        let [channels] = self.flow.z_shape();
        channels
    }

    /// Adds `U[0, 1)` noise to every discrete pixel.
    pub fn dequantize(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let noise = Tensor::random(z.shape(), Distribution::Uniform(0., 1.), &z.device());
        z + noise
    }

    /// Maps pixels in `(0, N_BINS)` to logit space (forward) or back (inverse), keeping `ldj`
    /// consistent with the change of variables.
    ///
    /// # Shapes
    ///   - Input z [batch, channels], ldj [batch]
    ///   - Output z [batch, channels], ldj [batch]
    pub fn logit_normalize(
        &self,
        z: Tensor<B, 2>,
        ldj: Tensor<B, 1>,
        direction: Direction,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [batch, channels] = z.dims();
        let log_bins_total = N_BINS.ln() * channels as f64;

        match direction {
            Direction::Forward => {
                let z = z / N_BINS;
                let ldj = ldj - log_bins_total;

                let z = z * (1. - ALPHA) + ALPHA * 0.5;
                let log_z = z.clone().log();
                let log_1mz = z.neg().log1p();
                let ldj = ldj - (log_z.clone() + log_1mz.clone()).sum_dim(1).reshape([batch]);
                let z = log_z - log_1mz;

                (z, ldj)
            }
            Direction::Inverse => {
                // log(s) + log(1 - s) with s = sigmoid(z)
                let log_derivative = log_sigmoid(z.clone()) + log_sigmoid(z.clone().neg());
                let ldj = ldj + log_derivative.sum_dim(1).reshape([batch]);
                let s = burn::tensor::activation::sigmoid(z);

                let s = (s - ALPHA * 0.5) / (1. - ALPHA);
                let z = s * N_BINS;
                let ldj = ldj + log_bins_total;

                (z, ldj)
            }
        }
    }

    /// Per-example log-likelihood of discrete pixels, `log p(x) = log p(z) + log|det J|`.
    ///
    /// # Shapes
    ///   - Input [batch, channels], pixel values in `[0, 255]`
    ///   - Output [batch]
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, channels] = input.dims();
        debug_assert_eq!(channels, self.dim());
        let ldj = Tensor::zeros([batch], &input.device());

        let z = self.dequantize(input);
        let (z, ldj) = self.logit_normalize(z, ldj, Direction::Forward);
        let (z, ldj) = self.flow.forward(z, ldj);

        log_prior(z).sum_dim(1).reshape([batch]) + ldj
    }

    /// Draws `n_samples` images by inverting the flow on Gaussian noise.
    ///
    /// # Shapes
    ///   - Output [n_samples, channels], values in `[0, MAX_PIXEL]`
    pub fn sample(&self, n_samples: usize, device: &B::Device) -> Tensor<B, 2> {
        let [channels] = self.flow.z_shape();
        let z = sample_prior::<B, 2>([n_samples, channels], device);
        let ldj = Tensor::zeros([n_samples], device);

        let (z, ldj) = self.flow.inverse(z, ldj);
        let (z, _ldj) = self.logit_normalize(z, ldj, Direction::Inverse);

        z.clamp(0., MAX_PIXEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::scalar;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_model(device: &<TestBackend as Backend>::Device) -> FlowModel<TestBackend> {
        FlowModelConfig::new()
            .with_flow(FlowConfig::new().with_n_flows(1).with_n_hidden(16))
            .init(device)
    }

    #[test]
    fn logit_normalize_round_trip() {
        let device = Default::default();
        let model = small_model(&device);
        let x = Tensor::<TestBackend, 2>::random([3, 784], Distribution::Uniform(0.5, 255.5), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([3], &device);

        let (z, ldj_z) = model.logit_normalize(x.clone(), ldj, Direction::Forward);
        let (y, ldj_y) = model.logit_normalize(z, ldj_z, Direction::Inverse);

        assert!(scalar((y - x).abs().max()) < 1e-3);
        // the inverse log-determinant cancels the forward one
        assert!(scalar(ldj_y.abs().max()) < 1.0);
    }

    #[test]
    fn logit_normalize_round_trip_near_the_interval_edges() {
        let device = Default::default();
        let model = small_model(&device);
        let x = Tensor::cat(
            vec![
                Tensor::<TestBackend, 2>::full([1, 784], 0.001, &device),
                Tensor::<TestBackend, 2>::full([1, 784], 255.999, &device),
            ],
            0,
        );
        let ldj = Tensor::<TestBackend, 1>::zeros([2], &device);

        let (z, ldj_z) = model.logit_normalize(x.clone(), ldj, Direction::Forward);
        assert!(scalar(z.clone().abs().max()).is_finite());
        let forward_ldj = scalar(ldj_z.clone().abs().max());
        let (y, ldj_y) = model.logit_normalize(z, ldj_z, Direction::Inverse);

        assert!(scalar((y - x).abs().max()) < 1e-3);
        assert!(scalar(ldj_y.abs().max()) < 1e-3 * forward_ldj);
    }

    #[test]
    fn log_px_is_finite_for_every_pixel_value() {
        let device = Default::default();
        let model = small_model(&device);
        let pixels: Vec<f32> = (0..4 * 784).map(|i| (i % 256) as f32).collect();
        let input = Tensor::<TestBackend, 2>::from_data(TensorData::new(pixels, [4, 784]), &device);
        let extremes = Tensor::cat(
            vec![
                Tensor::<TestBackend, 2>::zeros([1, 784], &device),
                Tensor::<TestBackend, 2>::ones([1, 784], &device) * 255.,
            ],
            0,
        );

        for input in [input, extremes] {
            let log_px = model.forward(input);
            let [batch] = log_px.dims();
            assert!(batch > 0);
            assert_eq!(scalar(log_px.clone().is_nan().float().sum()), 0.0);
            assert!(scalar(log_px.abs().max()).is_finite());
        }
    }

    #[test]
    fn sample_shape_and_range() {
        let device = Default::default();
        let model = small_model(&device);
        let samples = model.sample(10, &device);
        assert_eq!(samples.dims(), [10, 784]);
        assert!(scalar(samples.clone().min()) >= 0.0);
        assert!(scalar(samples.max()) < 256.0);
    }
}
