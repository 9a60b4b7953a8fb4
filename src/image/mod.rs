//! Image decoding, normalization, and encoding.
//!
//! Images travel through the engine as NCHW `f32` arrays normalized with the
//! ImageNet per-channel statistics the backbone was trained on.

mod load;
mod save;

pub use load::{decode, load_image};
pub use save::{denormalize, encode, save_image, OutputFormat};

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
pub type ImageTensor = Array4<f32>;

/// Canonical width every input is resized to.
pub const CANONICAL_WIDTH: u32 = 600;

/// Canonical height every input is resized to.
pub const CANONICAL_HEIGHT: u32 = 800;

/// Per-channel mean used for normalization (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation used for normalization (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// JPEG quality used when no other quality is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Width and height that decoded images are resized to.
///
/// Content and style must share one size so their activations line up
/// layer by layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Tensor shape `(1, 3, height, width)` for an image of this size.
    #[must_use]
    pub const fn tensor_shape(&self) -> (usize, usize, usize, usize) {
        (1, RGB_CHANNELS, self.height as usize, self.width as usize)
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(CANONICAL_WIDTH, CANONICAL_HEIGHT)
    }
}
