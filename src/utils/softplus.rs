use burn::prelude::*;
use burn::tensor::DType;
use burn::tensor::Element;

/// Applies the SoftPlus function element-wise.
///
/// The SoftPlus function is a smooth approximation of the ReLU function and is strictly
/// positive for finite inputs.
pub fn softplus<const D: usize, B: Backend>(x: Tensor<B, D>) -> Tensor<B, D> {
    match <B::FloatElem as Element>::dtype() {
        DType::F16 => {
            // max(a,b) = (a + b + |a-b|)/2
            // softplus = max(x, 0) + log(e^-|x| + 1)
            //          = (x + |x|) / 2 + log(e^-|x| + 1)
            let xabs = x.clone().abs();
            (x + xabs.clone()) / 2. + xabs.neg().exp().log1p()
        }
        _ => {
            // same rewrite, avoids exp overflow on large activations
            x.clone().clamp_min(0.) + x.abs().neg().exp().log1p()
        }
    }
}
