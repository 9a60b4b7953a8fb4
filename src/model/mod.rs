//! Frozen backbone and pretrained weight management.

mod backbone;
mod loader;

pub use backbone::{Activations, Backbone, ConvStack, LayerId, LayerKind, VGG19_FEATURES};
pub use loader::{load_backbone, load_vgg19, WeightCache, VGG19_FILENAME, VGG19_URL};

#[cfg(test)]
pub(crate) use backbone::tests::{tiny_backbone, TestBackend, TINY_PLAN};
