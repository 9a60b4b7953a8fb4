//! Composite content + style loss.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{Error, Result};
use crate::model::{Activations, LayerId};

use super::gram::gram_matrix;

/// Layers whose activations are matched against the content image.
pub const CONTENT_LAYERS: [usize; 2] = [1, 4];

/// Layers whose gram matrices are matched against the style image.
pub const STYLE_LAYERS: [usize; 5] = [1, 2, 3, 4, 5];

/// Per-layer style weights, aligned with [`STYLE_LAYERS`].
pub const STYLE_WEIGHTS: [f32; 5] = [1.0, 0.5, 0.5, 0.2, 0.1];

/// Multiplier applied to the summed style loss.
///
/// Gram normalization makes style terms several orders of magnitude smaller
/// than content terms.
pub const STYLE_SCALE: f32 = 1e6;

/// Which layers feed which loss term.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSelection {
    pub content: Vec<LayerId>,
    pub style: Vec<LayerId>,
    /// One weight per entry of `style`, in the same order.
    pub style_weights: Vec<f32>,
}

impl Default for LayerSelection {
    fn default() -> Self {
        Self {
            content: CONTENT_LAYERS.iter().copied().map(LayerId).collect(),
            style: STYLE_LAYERS.iter().copied().map(LayerId).collect(),
            style_weights: STYLE_WEIGHTS.to_vec(),
        }
    }
}

impl LayerSelection {
    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the weight list does not line up with the style layers.
    pub fn validate(&self) -> Result<()> {
        if self.style_weights.len() != self.style.len() {
            return Err(Error::invalid(
                "style_weights",
                format!(
                    "expected {} weights (one per style layer), got {}",
                    self.style.len(),
                    self.style_weights.len()
                ),
            ));
        }

        if self.style_weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::invalid("style_weights", "must be finite"));
        }

        Ok(())
    }

    /// Check every selected layer exists in a backbone with `conv_count` convolutions.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range layer.
    pub fn validate_for(&self, conv_count: usize) -> Result<()> {
        self.validate()?;

        let selected = self.content.iter().chain(self.style.iter());
        if let Some(id) = selected.into_iter().find(|id| id.0 >= conv_count) {
            return Err(Error::invalid(
                "layers",
                format!("{id} is out of range for a backbone with {conv_count} convolutions"),
            ));
        }

        Ok(())
    }

    /// Style weight for `id`, taken from its position in the style list.
    #[must_use]
    pub fn style_weight(&self, id: LayerId) -> Option<f32> {
        self.style
            .iter()
            .position(|&layer| layer == id)
            .and_then(|index| self.style_weights.get(index).copied())
    }
}

/// Loss terms for one evaluation.
#[derive(Debug, Clone)]
pub struct LossTerms<B: Backend> {
    /// `style_scale * style + content`; the value that is back-propagated.
    pub total: Tensor<B, 1>,
    /// Sum of content MSEs over the content layers.
    pub content: Tensor<B, 1>,
    /// Weighted sum of gram MSEs over the style layers, before scaling.
    pub style: Tensor<B, 1>,
}

/// Plain numbers read back from [`LossTerms`], for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossValues {
    pub total: f32,
    pub content: f32,
    pub style: f32,
}

impl<B: Backend> LossTerms<B> {
    /// Read the three terms back to the host.
    #[must_use]
    pub fn values(&self) -> LossValues {
        use burn::tensor::ElementConversion;

        let read = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f32>();
        LossValues {
            total: read(&self.total),
            content: read(&self.content),
            style: read(&self.style),
        }
    }
}

fn mse<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).mean()
}

/// Evaluate content and style loss for the target's activations.
///
/// `content` and `style` are the reference activations of the content and
/// style images, produced by the same backbone as `target`. A layer in both
/// selections contributes to both sums.
pub fn evaluate<B: Backend>(
    target: &Activations<B>,
    content: &Activations<B>,
    style: &Activations<B>,
    selection: &LayerSelection,
    style_scale: f32,
) -> LossTerms<B> {
    let device = target
        .maps
        .first()
        .map_or_else(Default::default, Tensor::device);
    let mut content_loss = Tensor::<B, 1>::zeros([1], &device);
    let mut style_loss = Tensor::<B, 1>::zeros([1], &device);

    let references = content.maps.iter().zip(style.maps.iter());
    for ((id, map), (content_ref, style_ref)) in target.iter().zip(references) {
        if selection.content.contains(&id) {
            content_loss = content_loss + mse(map.clone(), content_ref.clone());
        }

        if let Some(weight) = selection.style_weight(id) {
            let target_gram = gram_matrix(map.clone());
            let style_gram = gram_matrix(style_ref.clone());
            style_loss = style_loss + mse(target_gram, style_gram).mul_scalar(weight);
        }
    }

    let total = style_loss.clone().mul_scalar(style_scale) + content_loss.clone();

    LossTerms {
        total,
        content: content_loss,
        style: style_loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tiny_backbone, TestBackend};
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::Distribution;

    fn random_image(seed_shift: f64) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 4>::random(
            [1, 3, 16, 16],
            Distribution::Normal(seed_shift, 1.0),
            &NdArrayDevice::Cpu,
        )
    }

    #[test]
    fn test_default_selection_is_consistent() {
        let selection = LayerSelection::default();
        selection.validate().unwrap();
        assert_eq!(selection.style_weight(LayerId(1)), Some(1.0));
        assert_eq!(selection.style_weight(LayerId(5)), Some(0.1));
        assert_eq!(selection.style_weight(LayerId(0)), None);
    }

    #[test]
    fn test_weight_count_must_match() {
        let selection = LayerSelection {
            style_weights: vec![1.0],
            ..LayerSelection::default()
        };
        let err = selection.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "style_weights"));
    }

    #[test]
    fn test_out_of_range_layer_rejected() {
        let selection = LayerSelection::default();
        selection.validate_for(16).unwrap();
        assert!(selection.validate_for(5).is_err());
    }

    #[test]
    fn test_content_loss_is_zero_against_itself() {
        let backbone = tiny_backbone();
        let image = random_image(0.0);
        let acts = backbone.extract(image.clone()).detach();
        let style = backbone.extract(random_image(0.5)).detach();

        let terms = evaluate(
            &acts,
            &acts,
            &style,
            &LayerSelection::default(),
            STYLE_SCALE,
        );

        assert_eq!(terms.values().content, 0.0);
    }

    #[test]
    fn test_style_loss_is_zero_against_itself() {
        let backbone = tiny_backbone();
        let acts = backbone.extract(random_image(0.0)).detach();
        let content = backbone.extract(random_image(1.0)).detach();

        let values = evaluate(&acts, &content, &acts, &LayerSelection::default(), STYLE_SCALE).values();

        assert_eq!(values.style, 0.0);
        assert!(values.content > 0.0);
    }

    #[test]
    fn test_total_combines_scaled_style_and_content() {
        let backbone = tiny_backbone();
        let target = backbone.extract(random_image(0.0));
        let content = backbone.extract(random_image(0.3)).detach();
        let style = backbone.extract(random_image(-0.3)).detach();

        let values = evaluate(&target, &content, &style, &LayerSelection::default(), 10.0).values();

        let expected = values.style * 10.0 + values.content;
        assert!((values.total - expected).abs() <= expected.abs() * 1e-5);
    }

    #[test]
    fn test_shared_layer_counts_in_both_terms() {
        let backbone = tiny_backbone();
        let target = backbone.extract(random_image(0.0));
        let content = backbone.extract(random_image(0.3)).detach();
        let style = backbone.extract(random_image(-0.3)).detach();

        let only_content = LayerSelection {
            content: vec![LayerId(2)],
            style: vec![],
            style_weights: vec![],
        };
        let only_style = LayerSelection {
            content: vec![],
            style: vec![LayerId(2)],
            style_weights: vec![0.5],
        };
        let both = LayerSelection {
            content: vec![LayerId(2)],
            style: vec![LayerId(2)],
            style_weights: vec![0.5],
        };

        let c = evaluate(&target, &content, &style, &only_content, 1.0).values();
        let s = evaluate(&target, &content, &style, &only_style, 1.0).values();
        let b = evaluate(&target, &content, &style, &both, 1.0).values();

        assert!((b.content - c.content).abs() < 1e-6);
        assert!((b.style - s.style).abs() < 1e-9);
        assert!(c.style == 0.0 && s.content == 0.0);
    }

    #[test]
    fn test_empty_selection_is_zero() {
        let backbone = tiny_backbone();
        let target = backbone.extract(random_image(0.0));
        let other = backbone.extract(random_image(2.0)).detach();
        let selection = LayerSelection {
            content: vec![],
            style: vec![],
            style_weights: vec![],
        };

        let values = evaluate(&target, &other, &other, &selection, STYLE_SCALE).values();
        assert_eq!(values.total, 0.0);
    }
}
