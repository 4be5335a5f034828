use burn::prelude::*;
use burn::tensor::{DType, Element, ElementConversion};

pub mod gaussian;
pub mod grad_clip;
pub mod log_sigmoid;
pub mod loss;
pub mod mask;
pub mod softplus;

/// A small positive value that stays representable (and safely divisible) for the backend float.
///
/// Sits halfway, in log10 scale, between the machine epsilon and a value derived from the
/// smallest normal exponent.
pub fn div_eps_f32<B: Backend>() -> f32 {
    let (min_exp, epsilon) = match <B::FloatElem as Element>::dtype() {
        // 4.0693917e-16
        DType::F64 => (f64::MIN_EXP as f32, f64::EPSILON as f32),
        // 8.1584695e-8
        DType::F32 | DType::Flex32 => (f32::MIN_EXP as f32, f32::EPSILON),
        // 7.1209995e-4
        DType::F16 => (
            burn::tensor::f16::MIN_EXP as f32,
            burn::tensor::f16::EPSILON.to_f32(),
        ),
        // 2.0885676e-5
        DType::BF16 => (
            burn::tensor::bf16::MIN_EXP as f32,
            burn::tensor::bf16::EPSILON.to_f32(),
        ),
        DType::I64
        | DType::I32
        | DType::I16
        | DType::I8
        | DType::U64
        | DType::U32
        | DType::U16
        | DType::U8
        | DType::Bool => {
            unreachable!()
        }
        DType::QFloat(_) => {
            unimplemented!()
        }
    };
    let raw_exp = -(-min_exp * 2.3f32).powf(0.35f32);
    let eps_exp = epsilon.log10();
    10f32.powf((raw_exp + eps_exp) / 2f32)
}

pub fn div_eps<B: Backend>() -> B::FloatElem {
    div_eps_f32::<B>().elem()
}

/// Reads a single-element tensor back as `f64`.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn div_eps_is_small_and_positive() {
        let eps = div_eps_f32::<NdArray<f32>>();
        assert!(eps > 0.0);
        assert!(eps < 1e-6);
        assert!(1.0 / eps < f32::MAX);
    }
}
