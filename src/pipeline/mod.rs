//! Style transfer optimization pipeline.

mod convert;
mod gram;
mod loss;
mod optimizer;
mod transfer;

pub use convert::{to_array, to_tensor};
pub use gram::gram_matrix;
pub use loss::{
    evaluate, LayerSelection, LossTerms, LossValues, CONTENT_LAYERS, STYLE_LAYERS, STYLE_SCALE,
    STYLE_WEIGHTS,
};
pub use optimizer::{RmsProp, RMSPROP_ALPHA, RMSPROP_EPSILON};
pub use transfer::{optimize, Config, StyleTransfer, LEARNING_RATE, NUM_ITERATIONS};
