use crate::utils::scalar;
use burn::module::ParamId;
use burn::nn::Linear;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Modules exposing the linear layers that share a single gradient-norm budget.
pub trait LinearParams<B: Backend> {
    fn linears(&self) -> Vec<&Linear<B>>;
}

/// Global L2 norm over the gradients of every weight and bias in `linears`.
///
/// Parameters without a registered gradient count as zero.
pub fn grad_norm<AutoB: AutodiffBackend>(
    linears: &[&Linear<AutoB>],
    grads: &GradientsParams,
) -> f64 {
    let mut sum_sq = 0.;
    for linear in linears {
        if let Some(g) = grads.get::<AutoB::InnerBackend, 2>(linear.weight.id) {
            sum_sq += scalar(g.square().sum());
        }
        if let Some(bias) = &linear.bias {
            if let Some(g) = grads.get::<AutoB::InnerBackend, 1>(bias.id) {
                sum_sq += scalar(g.square().sum());
            }
        }
    }
    sum_sq.sqrt()
}

/// Rescales the gradients of `linears` so that their global norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm<AutoB: AutodiffBackend>(
    linears: &[&Linear<AutoB>],
    grads: &mut GradientsParams,
    max_norm: f64,
) -> f64 {
    let total_norm = grad_norm(linears, grads);
    let clip_coef = max_norm / (total_norm + 1e-6);
    if clip_coef < 1. {
        for linear in linears {
            rescale::<AutoB::InnerBackend, 2>(grads, linear.weight.id, clip_coef);
            if let Some(bias) = &linear.bias {
                rescale::<AutoB::InnerBackend, 1>(grads, bias.id, clip_coef);
            }
        }
    }
    total_norm
}

fn rescale<B: Backend, const D: usize>(grads: &mut GradientsParams, id: ParamId, factor: f64) {
    if let Some(g) = grads.remove::<B, D>(id) {
        grads.register(id, g * factor);
    }
}
