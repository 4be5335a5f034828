use burn::prelude::*;

/// Checkerboard mask over a `height x width` image, flattened row-major.
///
/// Pixel `(i, j)` is set to 1 when `i + j` is even and to 0 otherwise.
///
/// # Shape
/// [1, height * width]
pub fn checkerboard_mask<B: Backend>(
    height: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..height)
        .flat_map(|i| (0..width).map(move |j| if (i + j) % 2 == 0 { 1. } else { 0. }))
        .collect();
    let data = TensorData::new(values, [1, height * width]).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

/// `1 - mask`.
pub fn complement<B: Backend, const D: usize>(mask: Tensor<B, D>) -> Tensor<B, D> {
    mask.neg() + 1.
}
