//! Frozen convolutional feature extractor.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Ordinal of a convolution among the backbone's convolutions, in depth order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub usize);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conv{}", self.0)
    }
}

/// One stage of a sequential backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// 3x3 convolution with padding 1.
    Conv { in_channels: usize, out_channels: usize },
    /// Rectified linear unit.
    Relu,
    /// 2x2 max pooling with stride 2.
    MaxPool,
}

const fn conv(in_channels: usize, out_channels: usize) -> LayerKind {
    LayerKind::Conv {
        in_channels,
        out_channels,
    }
}

use LayerKind::{MaxPool, Relu};

/// VGG-19 `features` stack in torchvision layer order.
///
/// Positions in this list match the `features.{N}` indices of the
/// pretrained checkpoint.
#[rustfmt::skip]
pub const VGG19_FEATURES: [LayerKind; 37] = [
    conv(3, 64), Relu, conv(64, 64), Relu, MaxPool,
    conv(64, 128), Relu, conv(128, 128), Relu, MaxPool,
    conv(128, 256), Relu, conv(256, 256), Relu, conv(256, 256), Relu, conv(256, 256), Relu, MaxPool,
    conv(256, 512), Relu, conv(512, 512), Relu, conv(512, 512), Relu, conv(512, 512), Relu, MaxPool,
    conv(512, 512), Relu, conv(512, 512), Relu, conv(512, 512), Relu, conv(512, 512), Relu, MaxPool,
];

/// Learnable parameters of a backbone: its convolutions in depth order.
#[derive(Module, Debug)]
pub struct ConvStack<B: Backend> {
    pub(crate) convs: Vec<Conv2d<B>>,
}

/// Activation maps recorded at every convolution boundary, with their ids.
#[derive(Debug, Clone)]
pub struct Activations<B: Backend> {
    pub maps: Vec<Tensor<B, 4>>,
    pub ids: Vec<LayerId>,
}

impl<B: Backend> Activations<B> {
    /// Cut every map off the autodiff graph.
    #[must_use]
    pub fn detach(self) -> Self {
        Self {
            maps: self.maps.into_iter().map(Tensor::detach).collect(),
            ids: self.ids,
        }
    }

    /// Number of recorded maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Iterate `(id, map)` pairs in depth order.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Tensor<B, 4>)> {
        self.ids.iter().copied().zip(self.maps.iter())
    }
}

/// A sequential convolutional network used as a fixed measurement function.
///
/// Cloning is cheap: parameter tensors are reference counted, so clones share
/// the same frozen weights.
#[derive(Debug, Clone)]
pub struct Backbone<B: Backend> {
    plan: Vec<LayerKind>,
    weights: ConvStack<B>,
}

impl<B: Backend> Backbone<B> {
    /// Build a backbone with freshly initialised (untrained) weights.
    #[must_use]
    pub fn new(plan: &[LayerKind], device: &B::Device) -> Self {
        let convs = plan
            .iter()
            .filter_map(|layer| match *layer {
                LayerKind::Conv {
                    in_channels,
                    out_channels,
                } => Some(
                    Conv2dConfig::new([in_channels, out_channels], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                ),
                _ => None,
            })
            .collect();

        Self::from_weights(plan, ConvStack { convs })
    }

    /// VGG-19 layout with untrained weights; load a record to make it useful.
    #[must_use]
    pub fn vgg19(device: &B::Device) -> Self {
        Self::new(&VGG19_FEATURES, device)
    }

    pub(crate) fn from_weights(plan: &[LayerKind], weights: ConvStack<B>) -> Self {
        Self {
            plan: plan.to_vec(),
            weights: weights.no_grad(),
        }
    }

    /// Layer plan this backbone runs.
    #[must_use]
    pub fn plan(&self) -> &[LayerKind] {
        &self.plan
    }

    /// Number of convolutions, i.e. the number of maps `extract` emits.
    #[must_use]
    pub fn conv_count(&self) -> usize {
        self.weights.convs.len()
    }

    /// Parameters, for loading pretrained records.
    pub(crate) fn into_weights(self) -> ConvStack<B> {
        self.weights
    }

    /// Run `input` through every layer and record one map per convolution.
    ///
    /// A map is taken after the rectifier that directly follows its
    /// convolution. Gradient tracking follows the input tensor.
    #[must_use]
    pub fn extract(&self, input: Tensor<B, 4>) -> Activations<B> {
        let mut maps = Vec::with_capacity(self.conv_count());
        let mut ids = Vec::with_capacity(self.conv_count());
        let mut convs = self.weights.convs.iter();
        let mut pending = false;
        let mut x = input;

        for layer in &self.plan {
            match layer {
                LayerKind::Conv { .. } => {
                    if pending {
                        maps.push(x.clone());
                    }
                    let Some(conv) = convs.next() else { break };
                    x = conv.forward(x);
                    ids.push(LayerId(ids.len()));
                    pending = true;
                }
                LayerKind::Relu => {
                    x = relu(x);
                    if pending {
                        maps.push(x.clone());
                        pending = false;
                    }
                }
                LayerKind::MaxPool => {
                    if pending {
                        maps.push(x.clone());
                        pending = false;
                    }
                    x = max_pool_2x2(x);
                }
            }
        }

        if pending {
            maps.push(x);
        }

        Activations { maps, ids }
    }
}

/// 2x2 max pooling with stride 2; a trailing odd row or column is dropped.
///
/// Each window's gradient flows back through the `max_dim` scatter to its
/// maximum, for maps of any aspect ratio.
fn max_pool_2x2<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let (rows, cols) = (height / 2, width / 2);

    let x = if height % 2 == 0 && width % 2 == 0 {
        x
    } else {
        x.slice([0..batch, 0..channels, 0..rows * 2, 0..cols * 2])
    };

    // [n, c, 2r + i, 2q + j] -> [(n, c, r), i, q, j]
    x.reshape([batch * channels * rows, 2, cols, 2])
        .max_dim(3)
        .max_dim(1)
        .reshape([batch, channels, rows, cols])
}
