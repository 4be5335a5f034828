use burn::prelude::*;

/// Applies the log sigmoid function element-wise.
///
/// `log_sigmoid(x) = log(1 / (1 + exp(-x))) = -softplus(-x)`
pub fn log_sigmoid<const D: usize, B: Backend>(x: Tensor<B, D>) -> Tensor<B, D> {
    -crate::utils::softplus::softplus(x.neg())
}
