//! Custom error types for styleshift.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the styleshift library.
#[derive(Error, Debug)]
pub enum Error {
    /// Uploaded or in-memory bytes are not a decodable image.
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode an image into memory.
    #[error("failed to encode image: {source}")]
    ImageEncode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to download pretrained weights.
    #[error("failed to download weights {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load pretrained weights into the backbone.
    #[error("failed to load weights {name}: {reason}")]
    ModelLoad { name: String, reason: String },

    /// Failed to create cache directory.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Tensor data could not be read back from the runtime.
    #[error("failed to read tensor data: {reason}")]
    TensorData { reason: String },

    /// Backpropagation produced no gradient for the target image.
    #[error("no gradient was recorded for the target image")]
    MissingGradient,

    /// The HTTP server failed to start or stopped abnormally.
    #[error("server error: {reason}")]
    Server { reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidParameter`] from borrowed parts.
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the caller's input rather than the engine.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ImageDecode { .. } | Self::ImageLoad { .. } | Self::InvalidParameter { .. }
        )
    }
}

/// Result type alias for styleshift operations.
pub type Result<T> = std::result::Result<T, Error>;
