//! RMSProp update rule for a single image tensor.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Default smoothing constant for the running average of squared gradients.
pub const RMSPROP_ALPHA: f64 = 0.99;

/// Default term added to the denominator for numerical stability.
pub const RMSPROP_EPSILON: f64 = 1e-8;

/// Per-element adaptive step: `v = a*v + (1-a)*g^2`, `x -= lr * g / (sqrt(v) + eps)`.
///
/// Holds the running average for one parameter tensor; state starts at zero
/// and lives as long as the optimizer.
#[derive(Debug, Clone)]
pub struct RmsProp<B: Backend> {
    learning_rate: f64,
    alpha: f64,
    epsilon: f64,
    square_avg: Option<Tensor<B, 4>>,
    steps: usize,
}

impl<B: Backend> RmsProp<B> {
    #[must_use]
    pub const fn new(learning_rate: f64, alpha: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            alpha,
            epsilon,
            square_avg: None,
            steps: 0,
        }
    }

    /// Number of steps applied so far.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Apply one update and return the new parameter value.
    pub fn step(&mut self, param: Tensor<B, 4>, grad: Tensor<B, 4>) -> Tensor<B, 4> {
        let square_avg = self
            .square_avg
            .take()
            .unwrap_or_else(|| Tensor::zeros_like(&grad));

        let square_avg = square_avg
            .mul_scalar(self.alpha)
            .add(grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.alpha));

        let denom = square_avg.clone().sqrt().add_scalar(self.epsilon);
        let update = grad.div(denom).mul_scalar(self.learning_rate);

        self.square_avg = Some(square_avg);
        self.steps += 1;

        param.sub(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestBackend;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::TensorData;

    type Inner = <TestBackend as burn::tensor::backend::AutodiffBackend>::InnerBackend;

    fn tensor(values: [f32; 4]) -> Tensor<Inner, 4> {
        Tensor::from_data(TensorData::new(values.to_vec(), [1, 1, 2, 2]), &NdArrayDevice::Cpu)
    }

    #[test]
    fn test_first_step_matches_closed_form() {
        let mut opt = RmsProp::<Inner>::new(0.01, 0.99, 1e-8);
        let param = tensor([1.0, 1.0, 1.0, 1.0]);
        let grad = tensor([2.0, -2.0, 0.5, 0.0]);

        let next = opt.step(param, grad).into_data().to_vec::<f32>().unwrap();

        // v = 0.01 * g^2, so g / sqrt(v) = 10 * sign(g)
        let expected = [1.0 - 0.1, 1.0 + 0.1, 1.0 - 0.1, 1.0];
        for (a, b) in next.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn test_zero_gradient_leaves_param_unchanged() {
        let mut opt = RmsProp::<Inner>::new(0.5, RMSPROP_ALPHA, RMSPROP_EPSILON);
        let param = tensor([0.3, -0.2, 4.0, 1.5]);

        let next = opt.step(param.clone(), tensor([0.0; 4]));

        next.into_data().assert_eq(&param.into_data(), true);
    }

    #[test]
    fn test_running_average_damps_repeated_steps() {
        let mut opt = RmsProp::<Inner>::new(0.01, 0.99, 1e-8);
        let mut param = tensor([0.0; 4]);
        let grad = tensor([1.0; 4]);

        param = opt.step(param, grad.clone());
        let first = param.clone().into_data().to_vec::<f32>().unwrap()[0];
        param = opt.step(param, grad);
        let second = param.into_data().to_vec::<f32>().unwrap()[0] - first;

        // Second step divides by sqrt(0.0199) instead of sqrt(0.01)
        assert!(second.abs() < first.abs());
        assert!(second < 0.0);
    }
}
