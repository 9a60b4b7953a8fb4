//! Image denormalization and encoding utilities.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

use crate::error::{Error, Result};

use super::{ImageTensor, IMAGENET_MEAN, IMAGENET_STD, RGB_CHANNELS};

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy JPEG with the given quality (1-100).
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

/// Reverse the ImageNet normalization and clamp every value to [0, 1].
///
/// # Errors
///
/// Returns an error if the tensor is not `(1, 3, H, W)`.
pub fn denormalize(tensor: &ImageTensor) -> Result<ImageTensor> {
    check_shape(tensor)?;

    let mut out = tensor.clone();
    for (c, mut channel) in out.axis_iter_mut(ndarray::Axis(1)).enumerate() {
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        channel.mapv_inplace(|v| v.mul_add(std, mean).clamp(0.0, 1.0));
    }
    Ok(out)
}

/// Encode a denormalized tensor (values in [0, 1]) into image bytes.
///
/// # Errors
///
/// Returns an error if the tensor is not `(1, 3, H, W)` or encoding fails.
pub fn encode(tensor: &ImageTensor, format: OutputFormat) -> Result<Vec<u8>> {
    let img = DynamicImage::ImageRgb8(tensor_to_image(tensor)?);
    let mut buf = Vec::new();

    match format {
        OutputFormat::Jpeg { quality } => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            img.write_with_encoder(encoder)
                .map_err(|source| Error::ImageEncode { source })?;
        }
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(|source| Error::ImageEncode { source })?;
        }
    }

    Ok(buf)
}

/// Save a denormalized tensor as an image file.
///
/// The format is inferred from the extension; `jpg`/`jpeg` use `quality`.
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(tensor: &ImageTensor, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let img = DynamicImage::ImageRgb8(tensor_to_image(tensor)?);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            img.write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    Ok(())
}

/// Convert a `(1, 3, H, W)` tensor in [0, 1] to an RGB image.
#[allow(clippy::cast_possible_truncation)]
fn tensor_to_image(tensor: &ImageTensor) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    check_shape(tensor)?;
    let (_, _, height, width) = tensor.dim();

    let img = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            to_u8(tensor[[0, 0, y, x]]),
            to_u8(tensor[[0, 1, y, x]]),
            to_u8(tensor[[0, 2, y, x]]),
        ])
    });

    Ok(img)
}

/// Only single RGB images can be denormalized or encoded.
fn check_shape(tensor: &ImageTensor) -> Result<()> {
    let (batch, channels, _, _) = tensor.dim();
    if batch != 1 || channels != RGB_CHANNELS {
        return Err(Error::ShapeMismatch {
            expected: "(1, 3, H, W)".to_string(),
            actual: format!("{:?}", tensor.shape()),
        });
    }
    Ok(())
}

/// Map a value in [0, 1] to [0, 255] with clamping and rounding.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}
