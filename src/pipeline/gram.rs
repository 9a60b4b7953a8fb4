//! Gram-matrix style representation.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Channel-correlation matrix of a `(1, C, H, W)` activation map.
///
/// The map is flattened to `(C, H*W)`, multiplied by its transpose, and
/// divided by `C*H*W` so layers of different resolution compare on one
/// scale. The result is `(C, C)` and symmetric.
pub fn gram_matrix<B: Backend>(map: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = map.dims();
    debug_assert_eq!(batch, 1, "gram matrix expects a single image");

    #[allow(clippy::cast_precision_loss)]
    let norm = (channels * height * width) as f32;

    let features = map.reshape([channels, height * width]);
    features
        .clone()
        .matmul(features.transpose())
        .div_scalar(norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tiny_backbone, TestBackend};
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::{Distribution, TensorData};

    fn assert_symmetric(gram: Tensor<TestBackend, 2>) {
        let [rows, cols] = gram.dims();
        assert_eq!(rows, cols);
        let transposed = gram.clone().transpose();
        let diff: f32 = (gram - transposed).abs().max().into_scalar();
        assert!(diff < 1e-5, "max asymmetry {diff}");
    }

    #[test]
    fn test_known_values() {
        // Two channels over a 1x2 map: [1, 2] and [3, 4]
        let map = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &NdArrayDevice::Cpu,
        );

        let gram = gram_matrix(map);

        // [[5, 11], [11, 25]] / 4
        let expected = TensorData::new(vec![1.25f32, 2.75, 2.75, 6.25], [2, 2]);
        gram.into_data().assert_approx_eq(&expected, 5);
    }

    #[test]
    fn test_symmetric_for_random_maps() {
        for shape in [[1, 1, 1, 1], [1, 3, 5, 7], [1, 16, 4, 4], [1, 8, 1, 9]] {
            let map = Tensor::<TestBackend, 4>::random(
                shape,
                Distribution::Normal(0.0, 1.0),
                &NdArrayDevice::Cpu,
            );
            assert_symmetric(gram_matrix(map));
        }
    }

    #[test]
    fn test_symmetric_for_every_backbone_layer() {
        let backbone = tiny_backbone();
        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 16, 16],
            Distribution::Normal(0.0, 1.0),
            &NdArrayDevice::Cpu,
        );

        for map in backbone.extract(input).maps {
            assert_symmetric(gram_matrix(map));
        }
    }

    #[test]
    fn test_diagonal_is_non_negative() {
        let map = Tensor::<TestBackend, 4>::random(
            [1, 6, 3, 3],
            Distribution::Normal(0.0, 1.0),
            &NdArrayDevice::Cpu,
        );

        let gram = gram_matrix(map).into_data().to_vec::<f32>().unwrap();
        for i in 0..6 {
            assert!(gram[i * 6 + i] >= 0.0);
        }
    }

    #[test]
    fn test_independent_of_spatial_tiling() {
        // Repeating a map spatially leaves the normalized gram unchanged
        let small = Tensor::<TestBackend, 4>::random(
            [1, 4, 2, 2],
            Distribution::Normal(0.0, 1.0),
            &NdArrayDevice::Cpu,
        );
        let tiled = Tensor::cat(vec![small.clone(), small.clone()], 3);

        let a = gram_matrix(small).into_data();
        let b = gram_matrix(tiled).into_data();
        a.assert_approx_eq(&b, 4);
    }
}
