use crate::utils::log_sigmoid::log_sigmoid;
use burn::module::Module;
use burn::prelude::*;

/// Elementwise binary cross entropy between logits and `{0, 1}` (or `[0, 1]`) targets.
#[derive(Module, Clone, Debug, Default)]
pub struct BinaryCrossEntropyLoss;

impl BinaryCrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// Compute the criterion on logits without reducing.
    ///
    /// # Shapes
    ///
    /// - input: `[..., any]`
    /// - targets: `[..., any]`
    /// - output: `[..., any]`
    pub fn forward_no_reduction<const D: usize, B: Backend>(
        &self,
        input: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, D> {
        // -(t * log(sigmoid(x)) + (1 - t) * log(1 - sigmoid(x))) = (1 - t) * x - log_sigmoid(x)
        (targets.neg() + 1.) * input.clone() - log_sigmoid(input)
    }

    /// Per-example loss, summed over the last dimension.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, features]`
    /// - targets: `[batch_size, features]`
    /// - output: `[batch_size]`
    pub fn forward_sum<B: Backend>(&self, input: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch_size, _features] = input.dims();
        let loss = self.forward_no_reduction(input, targets).sum_dim(1);
        loss.reshape([batch_size])
    }
}
