use crate::flow::{Coupling, CouplingConfig, Direction};
use crate::utils::grad_clip::LinearParams;
use crate::utils::mask::{checkerboard_mask, complement};
use burn::nn::Linear;
use burn::prelude::*;

/// Stack of coupling layers alternating a checkerboard mask and its complement.
#[derive(Config, Debug)]
pub struct FlowConfig {
    #[config(default = 28)]
    pub height: usize,
    #[config(default = 28)]
    pub width: usize,
    /// Each flow contributes two coupling layers, one per mask.
    #[config(default = 4)]
    pub n_flows: usize,
    #[config(default = 1024)]
    pub n_hidden: usize,
}

impl FlowConfig {
    pub fn dim(&self) -> usize {
        self.height * self.width
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Flow<B> {
        let channels = self.dim();
        let mask = checkerboard_mask::<B>(self.height, self.width, device);
        let coupling = CouplingConfig::new(channels).with_n_hidden(self.n_hidden);

        let mut layers = Vec::with_capacity(2 * self.n_flows);
        for _ in 0..self.n_flows {
            layers.push(coupling.init(mask.clone(), device));
            layers.push(coupling.init(complement(mask.clone()), device));
        }

        Flow { layers, channels }
    }
}

#[derive(Module, Debug)]
pub struct Flow<B: Backend> {
    /// # Shape
    /// [2 * n_flows]
    pub layers: Vec<Coupling<B>>,
    pub channels: usize,
}

impl<B: Backend> Flow<B> {
    /// Shape of a single latent example.
    pub fn z_shape(&self) -> [usize; 1] {
        [self.channels]
    }

    /// Applies every layer in order, composing the log-determinants.
    ///
    /// # Shapes
    ///   - Input z [batch, channels], ldj [batch]
    ///   - Output z [batch, channels], ldj [batch]
    pub fn forward(
        &self,
        mut z: Tensor<B, 2>,
        mut ldj: Tensor<B, 1>,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        for layer in self.layers.iter() {
            (z, ldj) = layer.forward(z, ldj);
        }
        (z, ldj)
    }

    /// Inverts every layer, last layer first.
    ///
    /// # Shapes
    ///   - Input z [batch, channels], ldj [batch]
    ///   - Output z [batch, channels], ldj [batch]
    pub fn inverse(
        &self,
        mut z: Tensor<B, 2>,
        mut ldj: Tensor<B, 1>,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        for layer in self.layers.iter().rev() {
            (z, ldj) = layer.inverse(z, ldj);
        }
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
}

impl<B: Backend> LinearParams<B> for Flow<B> {
    fn linears(&self) -> Vec<&Linear<B>> {
        self.layers.iter().flat_map(|layer| layer.linears()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::scalar;
    use burn::backend::NdArray;
    use burn::nn::{Initializer, LinearConfig};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn two_layers_are_the_identity_at_init() {
        let device = Default::default();
        let flow = FlowConfig::new()
            .with_n_flows(1)
            .with_n_hidden(16)
            .init::<TestBackend>(&device);
        assert_eq!(flow.layers.len(), 2);
        assert_eq!(flow.z_shape(), [784]);

        let z = Tensor::<TestBackend, 2>::random([4, 784], Distribution::Normal(0., 1.), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([4], &device);
        let (out, ldj) = flow.forward(z.clone(), ldj);

        assert!(scalar((out - z).abs().max()) < 1e-6);
        let ldj = ldj.into_data().to_vec::<f32>().unwrap();
        assert_eq!(ldj, vec![0.0; 4]);
    }

    #[test]
    fn masks_alternate_and_cover_every_feature() {
        let device = Default::default();
        let flow = FlowConfig::new()
            .with_height(4)
            .with_width(4)
            .with_n_flows(2)
            .with_n_hidden(8)
            .init::<TestBackend>(&device);
        assert_eq!(flow.layers.len(), 4);

        let first = flow.layers[0].mask.clone();
        let second = flow.layers[1].mask.clone();
        let coverage = (first.clone() + second).into_data().to_vec::<f32>().unwrap();
        assert_eq!(coverage, vec![1.0; 16]);
        assert!(scalar((flow.layers[2].mask.clone() - first).abs().sum()) == 0.0);
    }

    #[test]
    fn inverse_undoes_forward_with_trained_like_weights() {
        let device = Default::default();
        let mut flow = FlowConfig::new()
            .with_height(4)
            .with_width(4)
            .with_n_flows(2)
            .with_n_hidden(16)
            .init::<TestBackend>(&device);
        for layer in flow.layers.iter_mut() {
            layer.out_proj = LinearConfig::new(16, 32)
                .with_initializer(Initializer::Normal { mean: 0., std: 0.2 })
                .init(&device);
        }

        let z = Tensor::<TestBackend, 2>::random([3, 16], Distribution::Normal(0., 1.), &device);
        let ldj = Tensor::<TestBackend, 1>::zeros([3], &device);
        let (y, ldj_y) = flow.apply(z.clone(), ldj, Direction::Forward);
        assert!(scalar(ldj_y.clone().abs().sum()) > 0.0);

        let (x, ldj_x) = flow.apply(y, ldj_y.clone(), Direction::Inverse);
        assert!(scalar((x - z).abs().max()) < 1e-4);
        assert!(scalar((ldj_x - ldj_y).abs().max()) < 1e-7);
    }
}
