//! Moving image data between `ndarray` and the tensor runtime.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

/// Copy an NCHW array onto `device`.
pub fn to_tensor<B: Backend>(array: &ImageTensor, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(data, [n, c, h, w]), device)
}

/// Read a 4D tensor back into an NCHW array.
///
/// # Errors
///
/// Returns an error if the data cannot be read as `f32`.
pub fn to_array<B: Backend>(tensor: Tensor<B, 4>) -> Result<ImageTensor> {
    let [n, c, h, w] = tensor.dims();
    let data = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData {
            reason: format!("{err:?}"),
        })?;

    Array4::from_shape_vec((n, c, h, w), data).map_err(|_| Error::ShapeMismatch {
        expected: format!("{:?}", [n, c, h, w]),
        actual: "reshape failed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestBackend;
    use burn::backend::ndarray::NdArrayDevice;

    #[test]
    fn test_layout_is_preserved() {
        let array = Array4::from_shape_fn((1, 3, 4, 5), |(_, c, y, x)| (c * 100 + y * 10 + x) as f32);

        let tensor = to_tensor::<TestBackend>(&array, &NdArrayDevice::Cpu);
        assert_eq!(tensor.dims(), [1, 3, 4, 5]);

        let back = to_array(tensor).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn test_non_contiguous_input() {
        let base = Array4::from_shape_fn((1, 2, 3, 4), |(_, c, y, x)| (c * 100 + y * 10 + x) as f32);
        let swapped = base.clone().permuted_axes([0, 1, 3, 2]);

        let tensor = to_tensor::<TestBackend>(&swapped, &NdArrayDevice::Cpu);
        let back = to_array(tensor).unwrap();

        assert_eq!(back[[0, 1, 3, 2]], base[[0, 1, 2, 3]]);
    }
}
