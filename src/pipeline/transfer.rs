//! Style transfer optimization loop and the request-level handle.

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Error, Result};
use crate::image::{self, ImageSize, ImageTensor, OutputFormat, DEFAULT_JPEG_QUALITY};
use crate::model::{self, Backbone, WeightCache};

use super::convert::{to_array, to_tensor};
use super::loss::{self, LayerSelection, STYLE_SCALE};
use super::optimizer::{RmsProp, RMSPROP_ALPHA, RMSPROP_EPSILON};

/// Number of optimizer steps per request.
pub const NUM_ITERATIONS: u32 = 3500;

/// RMSProp learning rate.
pub const LEARNING_RATE: f64 = 0.005;

/// Configuration for the style transfer engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size both inputs are resized to before optimizing.
    pub image_size: ImageSize,

    /// Content/style layer selection and per-layer style weights.
    pub layers: LayerSelection,

    /// Multiplier on the style term.
    pub style_scale: f32,

    /// Number of optimizer steps. Zero returns the content image unchanged.
    pub iterations: u32,

    /// RMSProp learning rate.
    pub learning_rate: f64,

    /// RMSProp smoothing constant.
    pub rms_alpha: f64,

    /// RMSProp denominator epsilon.
    pub rms_epsilon: f64,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,

    /// Pretrained checkpoint to load instead of the cached download.
    pub weights_path: Option<PathBuf>,

    /// Draw a progress bar while optimizing.
    pub show_progress: bool,

    /// Log the loss at info level every this many iterations (0 disables).
    pub log_every: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_size: ImageSize::default(),
            layers: LayerSelection::default(),
            style_scale: STYLE_SCALE,
            iterations: NUM_ITERATIONS,
            learning_rate: LEARNING_RATE,
            rms_alpha: RMSPROP_ALPHA,
            rms_epsilon: RMSPROP_EPSILON,
            output_quality: DEFAULT_JPEG_QUALITY,
            weights_path: None,
            show_progress: true,
            log_every: 100,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        self.layers.validate()?;

        if self.image_size.width == 0 || self.image_size.height == 0 {
            return Err(Error::invalid("image_size", "dimensions must be non-zero"));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::invalid("learning_rate", "must be a positive finite number"));
        }

        if !(0.0..1.0).contains(&self.rms_alpha) {
            return Err(Error::invalid("rms_alpha", "must be in [0.0, 1.0)"));
        }

        if !(self.rms_epsilon.is_finite() && self.rms_epsilon > 0.0) {
            return Err(Error::invalid("rms_epsilon", "must be a positive finite number"));
        }

        if !self.style_scale.is_finite() {
            return Err(Error::invalid("style_scale", "must be finite"));
        }

        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::invalid("output_quality", "must be between 1 and 100"));
        }

        Ok(())
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(u64::from(self.iterations));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} Optimizing [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Optimize a copy of `content` toward the style of `style`.
///
/// Reference activations for both inputs are computed once and detached.
/// Each iteration re-extracts the target's activations with gradient
/// tracking, evaluates the composite loss, back-propagates, and applies one
/// RMSProp step. The last iterate is returned even if the loss went up or
/// became non-finite.
///
/// # Errors
///
/// Returns an error if the inputs differ in shape or no gradient reaches the
/// target.
pub fn optimize<B: AutodiffBackend>(
    backbone: &Backbone<B>,
    content: Tensor<B, 4>,
    style: Tensor<B, 4>,
    config: &Config,
) -> Result<Tensor<B::InnerBackend, 4>> {
    let (content_dims, style_dims) = (content.dims(), style.dims());
    if content_dims != style_dims {
        return Err(Error::ShapeMismatch {
            expected: format!("{content_dims:?}"),
            actual: format!("{style_dims:?}"),
        });
    }

    let content_refs = backbone.extract(content.clone()).detach();
    let style_refs = backbone.extract(style).detach();

    let mut target = content.inner();
    let mut optimizer = RmsProp::new(config.learning_rate, config.rms_alpha, config.rms_epsilon);
    let mut warned_non_finite = false;

    let pb = config.progress_bar();

    for iteration in 0..config.iterations {
        let leaf = Tensor::<B, 4>::from_inner(target.clone()).require_grad();
        let activations = backbone.extract(leaf.clone());

        let terms = loss::evaluate(
            &activations,
            &content_refs,
            &style_refs,
            &config.layers,
            config.style_scale,
        );

        // Fresh leaf each iteration, so gradients never accumulate across steps
        let grads = terms.total.backward();
        let grad = leaf.grad(&grads).ok_or(Error::MissingGradient)?;
        target = optimizer.step(target, grad);

        let values = terms.values();
        tracing::debug!(
            iteration,
            total = values.total,
            content = values.content,
            style = values.style,
            "loss"
        );
        if config.log_every > 0 && iteration % config.log_every == 0 {
            tracing::info!("Iteration {iteration} loss: {}", values.total);
        }
        if !values.total.is_finite() && !warned_non_finite {
            tracing::warn!("Loss became non-finite at iteration {iteration}; continuing");
            warned_non_finite = true;
        }

        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(target)
}

/// A loaded backbone plus configuration: everything needed to serve requests.
///
/// Cloning shares the frozen backbone weights; each call to [`run`](Self::run)
/// or [`stylize`](Self::stylize) owns its own target tensor and optimizer state.
#[derive(Debug, Clone)]
pub struct StyleTransfer<B: AutodiffBackend> {
    config: Config,
    device: B::Device,
    backbone: Backbone<B>,
}

impl<B: AutodiffBackend> StyleTransfer<B> {
    /// Load the pretrained VGG-19 backbone and build the engine.
    ///
    /// This will download weights if they are not already cached and no
    /// explicit path is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or weights cannot be loaded.
    pub fn new(config: Config, device: B::Device) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing style transfer with config: {config:?}");

        let weights = match &config.weights_path {
            Some(path) => path.clone(),
            None => WeightCache::new()?.fetch_vgg19()?,
        };
        let backbone = model::load_vgg19(&weights, &device)?;

        tracing::info!("Backbone loaded ({} convolutions)", backbone.conv_count());

        Self::with_backbone(config, backbone, device)
    }

    /// Build the engine around an already constructed backbone.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid for this backbone.
    pub fn with_backbone(config: Config, backbone: Backbone<B>, device: B::Device) -> Result<Self> {
        config.validate()?;
        config.layers.validate_for(backbone.conv_count())?;

        Ok(Self {
            config,
            device,
            backbone,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn backbone(&self) -> &Backbone<B> {
        &self.backbone
    }

    /// Stylize two normalized image tensors; returns the normalized result.
    ///
    /// # Errors
    ///
    /// Returns an error if optimization fails.
    pub fn stylize(&self, content: &ImageTensor, style: &ImageTensor) -> Result<ImageTensor> {
        tracing::info!(
            "Content image shape: {:?}, style image shape: {:?}",
            content.shape(),
            style.shape()
        );

        let content = to_tensor::<B>(content, &self.device);
        let style = to_tensor::<B>(style, &self.device);

        let result = optimize(&self.backbone, content, style, &self.config)?;
        tracing::info!("Style transfer complete. Tensor shape: {:?}", result.dims());

        to_array(result)
    }

    /// Decode both inputs, stylize, and encode the result as JPEG.
    ///
    /// # Errors
    ///
    /// Returns an error if either input is not an image or optimization fails.
    pub fn run(&self, content_bytes: &[u8], style_bytes: &[u8]) -> Result<Vec<u8>> {
        let content = image::decode(content_bytes, self.config.image_size)?;
        let style = image::decode(style_bytes, self.config.image_size)?;

        let stylized = self.stylize(&content, &style)?;

        image::encode(
            &image::denormalize(&stylized)?,
            OutputFormat::Jpeg {
                quality: self.config.output_quality,
            },
        )
    }

    /// Stylize image files and save the result; format follows the output extension.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, processing, or saving fails.
    pub fn process<P, Q, R>(&self, content_path: P, style_path: Q, output_path: R) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let output_path = output_path.as_ref();

        tracing::info!(
            "Processing content {} with style {}",
            content_path.as_ref().display(),
            style_path.as_ref().display()
        );

        let content = image::load_image(content_path, self.config.image_size)?;
        let style = image::load_image(style_path, self.config.image_size)?;

        let stylized = self.stylize(&content, &style)?;

        tracing::info!("Saving output to: {}", output_path.display());
        image::save_image(
            &image::denormalize(&stylized)?,
            output_path,
            self.config.output_quality,
        )?;

        tracing::info!("Processing complete");
        Ok(())
    }
}
