//! Affine coupling layer, as in "Density estimation using Real NVP" (Dinh et al., 2016).
//!
//! The masked half of the input conditions a scale and a translation that are applied to the
//! other half, so the Jacobian is triangular and its log-determinant is the sum of log-scales.

use crate::flow::Direction;
use crate::utils::grad_clip::LinearParams;
use crate::utils::mask::complement;
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::prelude::*;

#[derive(Config, Debug)]
pub struct CouplingConfig {
    /// Number of input (and output) features.
    pub c_in: usize,
    #[config(default = 1024)]
    pub n_hidden: usize,
}

impl CouplingConfig {
    /// Returns the initialized layer.
    ///
    /// `out_proj` starts at exactly zero, so the layer is the identity until it is trained.
    pub fn init<B: Backend>(&self, mask: Tensor<B, 2>, device: &B::Device) -> Coupling<B> {
        assert_eq!([1, self.c_in], mask.dims());
        Coupling {
            mask,
            in_proj: LinearConfig::new(self.c_in, self.n_hidden)
                .with_bias(true)
                .init(device),
            hidden: LinearConfig::new(self.n_hidden, self.n_hidden)
                .with_bias(true)
                .init(device),
            out_proj: LinearConfig::new(self.n_hidden, 2 * self.c_in)
                .with_bias(true)
                .with_initializer(Initializer::Zeros)
                .init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Coupling<B: Backend> {
    /// Features with mask 1 pass through unchanged and condition the others.
    ///
    /// # Shape
    /// [1, c_in]
    pub mask: Tensor<B, 2>,
    pub in_proj: Linear<B>,
    pub hidden: Linear<B>,
    /// Produces the raw scale (first `c_in` outputs) and translation (last `c_in` outputs).
    pub out_proj: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> Coupling<B> {
    /// # Shapes
    ///   - Input z [batch, c_in], ldj [batch]
    ///   - Output z [batch, c_in], ldj [batch]
    pub fn forward(&self, z: Tensor<B, 2>, ldj: Tensor<B, 1>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [batch, c_in] = z.dims();

        let (log_scale, translate) = self.scale_translate(z.clone());
        let z = log_scale.clone().exp() * (z + translate);
        debug_assert_eq!([batch, c_in], z.dims());

        let ldj = ldj + log_scale.sum_dim(1).reshape([batch]);

        (z, ldj)
    }

    /// The log-determinant is not needed when inverting, `ldj` is passed through.
    ///
    /// # Shapes
    ///   - Input z [batch, c_in], ldj [batch]
    ///   - Output z [batch, c_in], ldj [batch]
    pub fn inverse(&self, z: Tensor<B, 2>, ldj: Tensor<B, 1>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [batch, c_in] = z.dims();

        let (log_scale, translate) = self.scale_translate(z.clone());
        let z = log_scale.neg().exp() * z - translate;
        debug_assert_eq!([batch, c_in], z.dims());

        (z, ldj)
    }

    pub fn apply(
        &self,
        z: Tensor<B, 2>,
        ldj: Tensor<B, 1>,
        direction: Direction,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        match direction {
            Direction::Forward => self.forward(z, ldj),
            Direction::Inverse => self.inverse(z, ldj),
        }
    }

    /// Log-scale and translation, both zeroed on the masked features.
    ///
    /// # Shapes
    ///   - Input [batch, c_in]
    ///   - Output ([batch, c_in], [batch, c_in])
    fn scale_translate(&self, z: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, c_in] = z.dims();
        let mask = self.mask.clone();
        let free = complement(mask.clone());

        let h = self.in_proj.forward(z * mask);
        let h = self.activation.forward(h);
        let h = self.hidden.forward(h);
        let h = self.activation.forward(h);
        let h = self.out_proj.forward(h);
        debug_assert_eq!([batch, 2 * c_in], h.dims());

        let scale_raw = h.clone().narrow(1, 0, c_in);
        let translate_raw = h.narrow(1, c_in, c_in);

        // tanh keeps the scale in [1/e, e] per layer
        let log_scale = scale_raw.tanh() * free.clone();
        let translate = translate_raw * free;

        (log_scale, translate)
    }
}

impl<B: Backend> LinearParams<B> for Coupling<B> {
    fn linears(&self) -> Vec<&Linear<B>> {
        vec![&self.in_proj, &self.hidden, &self.out_proj]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::mask::checkerboard_mask;
    use crate::utils::scalar;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn max_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f64 {
        scalar((a - b).abs().max())
    }

    /// Replaces the zero-initialized head so that the layer is no longer the identity.
    fn perturbed(
        mut coupling: Coupling<TestBackend>,
        device: &<TestBackend as Backend>::Device,
    ) -> Coupling<TestBackend> {
        let [n_hidden, out] = coupling.out_proj.weight.dims();
        coupling.out_proj = LinearConfig::new(n_hidden, out)
            .with_initializer(Initializer::Normal { mean: 0., std: 0.5 })
            .init(device);
        coupling
    }

    #[test]
    fn identity_at_init_on_two_features() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let coupling = CouplingConfig::new(2).with_n_hidden(8).init(mask, &device);

        let z = Tensor::<TestBackend, 2>::from_floats([[2.0, 3.0]], &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([1], &device);
        let (z_out, ldj_out) = coupling.forward(z.clone(), ldj);

        assert!(max_abs_diff(z_out, z) < 1e-7);
        assert_eq!(scalar(ldj_out), 0.0);
    }

    #[test]
    fn identity_at_init_in_both_directions() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(4, 4, &device);
        let coupling = CouplingConfig::new(16).with_n_hidden(32).init(mask, &device);

        let z = Tensor::<TestBackend, 2>::random([5, 16], Distribution::Normal(0., 3.), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([5], &device);

        let (forward, forward_ldj) = coupling.forward(z.clone(), ldj.clone());
        let (inverse, inverse_ldj) = coupling.inverse(z.clone(), ldj);

        assert!(max_abs_diff(forward, z.clone()) < 1e-6);
        assert!(max_abs_diff(inverse, z) < 1e-6);
        assert_eq!(scalar(forward_ldj.abs().sum()), 0.0);
        assert_eq!(scalar(inverse_ldj.abs().sum()), 0.0);
    }

    #[test]
    fn forward_then_inverse_reconstructs_input() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(4, 4, &device);
        let coupling = perturbed(
            CouplingConfig::new(16).with_n_hidden(32).init(mask, &device),
            &device,
        );

        let z = Tensor::<TestBackend, 2>::random([6, 16], Distribution::Normal(0., 2.), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([6], &device);

        let (y, ldj_y) = coupling.apply(z.clone(), ldj, Direction::Forward);
        assert!(max_abs_diff(y.clone(), z.clone()) > 1e-3, "layer should not be the identity");
        assert!(scalar(ldj_y.clone().abs().sum()) > 0.0);

        let (x, ldj_x) = coupling.apply(y, ldj_y.clone(), Direction::Inverse);
        assert!(max_abs_diff(x, z) < 1e-4);
        // inverse leaves the accumulator alone
        assert!(max_abs_diff(ldj_x, ldj_y) < 1e-7);
    }

    #[test]
    fn masked_half_passes_through() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(4, 4, &device);
        let coupling = perturbed(
            CouplingConfig::new(16)
                .with_n_hidden(32)
                .init(mask.clone(), &device),
            &device,
        );

        let z = Tensor::<TestBackend, 2>::random([3, 16], Distribution::Normal(0., 1.), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([3], &device);

        let (y, _) = coupling.forward(z.clone(), ldj.clone());
        assert!(max_abs_diff(y * mask.clone(), z.clone() * mask.clone()) < 1e-7);

        let (x, _) = coupling.inverse(z.clone(), ldj);
        assert!(max_abs_diff(x * mask.clone(), z * mask) < 1e-7);
    }
}
