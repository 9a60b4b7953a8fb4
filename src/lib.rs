//! # styleshift
//!
//! Neural style transfer: synthesize an image that keeps the structure of a
//! content image while taking on the texture and color statistics of a style
//! image.
//!
//! A frozen, ImageNet-trained VGG-19 serves purely as a measurement device.
//! Starting from a copy of the content image, the target is refined with
//! RMSProp to minimize a weighted sum of content loss (activation MSE) and
//! style loss (gram-matrix MSE) at fixed layers.
//!
//! ## Example
//!
//! ```no_run
//! use styleshift::{Config, DefaultBackend, DefaultDevice, StyleTransfer};
//!
//! # fn main() -> styleshift::Result<()> {
//! let config = Config {
//!     iterations: 500,
//!     ..Config::default()
//! };
//! let transfer = StyleTransfer::<DefaultBackend>::new(config, DefaultDevice::default())?;
//!
//! transfer.process("content.jpg", "style.jpg", "stylized.jpg")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod server;

pub use error::{Error, Result};
pub use pipeline::{Config, StyleTransfer};

/// Tensor backend used by the binary and the server.
#[cfg(not(feature = "wgpu"))]
pub type DefaultBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

/// Tensor backend used by the binary and the server.
#[cfg(feature = "wgpu")]
pub type DefaultBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Device type of [`DefaultBackend`].
pub type DefaultDevice = <DefaultBackend as burn::tensor::backend::Backend>::Device;
