//! Image decoding utilities.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageSize, ImageTensor, IMAGENET_MEAN, IMAGENET_STD, RGB_CHANNELS};

/// Decode raw image bytes into a normalized tensor.
///
/// The image is:
/// 1. Decoded from any format enabled in the `image` crate
/// 2. Converted to RGB
/// 3. Resized to `size`
/// 4. Scaled to [0, 1] and normalized with the ImageNet mean/std
/// 5. Returned as NCHW tensor (1, 3, height, width)
///
/// # Errors
///
/// Returns [`Error::ImageDecode`] if the bytes are not a valid image.
pub fn decode(bytes: &[u8], size: ImageSize) -> Result<ImageTensor> {
    let img = image::load_from_memory(bytes).map_err(|source| Error::ImageDecode { source })?;
    Ok(image_to_tensor(&img, size))
}

/// Load an image from disk and convert to a normalized tensor.
///
/// # Errors
///
/// Returns an error if the image cannot be loaded.
pub fn load_image<P: AsRef<Path>>(path: P, size: ImageSize) -> Result<ImageTensor> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(image_to_tensor(&img, size))
}

/// Convert a `DynamicImage` to a normalized NCHW tensor.
#[allow(clippy::cast_possible_truncation)]
fn image_to_tensor(img: &DynamicImage, size: ImageSize) -> ImageTensor {
    let rgb = if img.width() == size.width && img.height() == size.height {
        img.to_rgb8()
    } else {
        // Bilinear, matching the reference preprocessing
        img.resize_exact(size.width, size.height, FilterType::Triangle)
            .to_rgb8()
    };

    let (width, height) = (size.width as usize, size.height as usize);
    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            let value = f32::from(pixel[c]) / 255.0;
            tensor[[0, c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_tensor_shape_uses_canonical_size() {
        let img = DynamicImage::new_rgb8(100, 140);
        let tensor = decode(&png_bytes(&img), ImageSize::default()).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 800, 600]);
    }

    #[test]
    fn test_normalization_of_black_image() {
        let img = DynamicImage::new_rgb8(8, 8);
        let tensor = image_to_tensor(&img, ImageSize::new(8, 8));

        for c in 0..RGB_CHANNELS {
            let expected = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
            for value in tensor.index_axis(ndarray::Axis(1), c) {
                assert!((value - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_channel_order_is_rgb() {
        let img = ImageBuffer::from_pixel(4, 4, Rgb([255u8, 0, 0]));
        let tensor = image_to_tensor(&DynamicImage::ImageRgb8(img), ImageSize::new(4, 4));

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = -IMAGENET_MEAN[1] / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 2, 2]] - red).abs() < 1e-6);
        assert!((tensor[[0, 1, 2, 2]] - green).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image", ImageSize::default()).unwrap_err();
        assert!(matches!(err, Error::ImageDecode { .. }));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_load_image_reports_path() {
        let err = load_image("/nonexistent/content.png", ImageSize::default()).unwrap_err();
        match err {
            Error::ImageLoad { path, .. } => assert!(path.ends_with("content.png")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
