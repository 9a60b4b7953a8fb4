//! Pretrained weight downloading and loading.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Error, Result};

use super::backbone::{Backbone, ConvStackRecord, LayerKind, VGG19_FEATURES};

/// File name of the cached VGG-19 checkpoint.
pub const VGG19_FILENAME: &str = "vgg19.pth";

/// ImageNet-trained VGG-19 (torchvision weights re-exported by timm).
pub const VGG19_URL: &str =
    "https://huggingface.co/timm/vgg19.tv_in1k/resolve/main/pytorch_model.bin";

/// Approximate checkpoint size, for progress indication when the server omits it.
const VGG19_APPROX_SIZE: u64 = 574_000_000;

/// Manages the weight cache directory and downloads.
pub struct WeightCache {
    cache_dir: PathBuf,
}

impl WeightCache {
    /// Create a new weight cache.
    ///
    /// Uses the platform-appropriate cache directory:
    /// - Windows: `%LOCALAPPDATA%\styleshift\models`
    /// - Linux: `~/.cache/styleshift/models`
    /// - macOS: `~/Library/Caches/styleshift/models`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join("styleshift").join("models"))
    }

    /// Use `cache_dir` instead of the platform default.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn at(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self { cache_dir })
    }

    /// Path of the VGG-19 checkpoint inside the cache.
    #[must_use]
    pub fn vgg19_path(&self) -> PathBuf {
        self.cache_dir.join(VGG19_FILENAME)
    }

    /// Get the path to the VGG-19 checkpoint, downloading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be downloaded.
    pub fn fetch_vgg19(&self) -> Result<PathBuf> {
        let path = self.vgg19_path();

        if !path.exists() {
            download_file(VGG19_URL, &path, VGG19_FILENAME, VGG19_APPROX_SIZE)?;
        }

        Ok(path)
    }
}

/// Load a pretrained VGG-19 backbone from a PyTorch checkpoint.
///
/// The checkpoint stores convolutions as `features.{N}.weight|bias`, where
/// `N` is the position in the full layer list; they are renamed to the
/// convolution ordinal used by [`Backbone`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the layout.
pub fn load_vgg19<B: Backend>(path: &Path, device: &B::Device) -> Result<Backbone<B>> {
    load_backbone(&VGG19_FEATURES, path, device)
}

/// Load a backbone with an arbitrary plan from a PyTorch checkpoint.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the layout.
pub fn load_backbone<B: Backend>(
    plan: &[LayerKind],
    path: &Path,
    device: &B::Device,
) -> Result<Backbone<B>> {
    tracing::info!("Loading backbone weights from {}", path.display());

    if !path.is_file() {
        return Err(Error::ModelLoad {
            name: path.display().to_string(),
            reason: "file not found".to_string(),
        });
    }

    let mut args = LoadArgs::new(path.to_path_buf());
    for (from, to) in key_remaps(plan) {
        args = args.with_key_remap(&from, &to);
    }

    let record: ConvStackRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|err| Error::ModelLoad {
            name: path.display().to_string(),
            reason: format!("{err:?}"),
        })?;

    let weights = Backbone::<B>::new(plan, device)
        .into_weights()
        .load_record(record);

    Ok(Backbone::from_weights(plan, weights))
}

/// Regex remaps from checkpoint positions to convolution ordinals.
fn key_remaps(plan: &[LayerKind]) -> Vec<(String, String)> {
    plan.iter()
        .enumerate()
        .filter(|(_, layer)| matches!(layer, LayerKind::Conv { .. }))
        .enumerate()
        .map(|(ordinal, (position, _))| {
            (
                format!(r"^features\.{position}\.(weight|bias)$"),
                format!("convs.{ordinal}.$1"),
            )
        })
        .collect()
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("Downloading {name}"));

    // Write to a temporary file first, then rename for atomicity
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    let mut reader = pb.wrap_read(response);
    std::io::copy(&mut reader, &mut file)?;
    file.flush()?;

    pb.finish_with_message(format!("Downloaded {name}"));

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaps_skip_non_conv_positions() {
        let remaps = key_remaps(&VGG19_FEATURES);

        assert_eq!(remaps.len(), 16);
        assert_eq!(remaps[0].0, r"^features\.0\.(weight|bias)$");
        assert_eq!(remaps[0].1, "convs.0.$1");
        // conv 2 sits after the first pool
        assert_eq!(remaps[2].0, r"^features\.5\.(weight|bias)$");
        assert_eq!(remaps[15].0, r"^features\.34\.(weight|bias)$");
        assert_eq!(remaps[15].1, "convs.15.$1");
    }

    #[test]
    fn test_cache_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::at(dir.path().join("nested").join("models")).unwrap();

        assert!(dir.path().join("nested").join("models").is_dir());
        assert!(cache.vgg19_path().ends_with(VGG19_FILENAME));
    }

    #[test]
    fn test_missing_checkpoint_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;

        let err = load_vgg19::<burn::backend::NdArray<f32>>(&dir.path().join("absent.pth"), &device)
            .unwrap_err();

        assert!(matches!(err, Error::ModelLoad { .. }));
    }
}
