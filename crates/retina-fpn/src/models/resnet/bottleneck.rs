//! # [`BottleneckBlock`] Block for `ResNet`
//!
//! [`BottleneckBlock`] is the bottleneck form of the core `ResNet` convolution unit:
//!
//! ```text
//! x -> 1x1 conv/norm/act -> 3x3 (strided) conv/norm/act -> 1x1 conv/norm -> (+ shortcut) -> act
//! ```
//!
//! The shortcut is the identity; or a [`ConvDownsample`] projection
//! when the block changes stride or channel count.
//!
//! [`BottleneckBlockMeta`] defines a common meta API for [`BottleneckBlock`]
//! and [`BottleneckBlockConfig`].

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::conv_shape::ceil_div_resolution;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::resnet::downsample::{ConvDownsample, ConvDownsampleConfig};
use crate::models::resnet::util::{CONV_INTO_RELU_INITIALIZER, scalar_to_array};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// Dilation rate for the 3x3 conv.
    fn dilation(&self) -> usize;

    /// Configures the size of `width` and `out_planes`.
    fn planes(&self) -> usize;

    /// Groups of the 3x3 conv filters.
    fn cardinality(&self) -> usize;

    /// Control factor for `width()`.
    fn base_width(&self) -> usize;

    /// Control factor for `out_planes()`
    fn expansion_factor(&self) -> usize;

    /// Inner (bottleneck) width.
    ///
    /// ``planes * (base_width / 64) * cardinality``
    fn width(&self) -> usize {
        self.planes() * (self.base_width() / 64) * self.cardinality()
    }

    /// The number of output feature planes.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// The stride of the 3x3 conv.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride), ceil(in_width / stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        ceil_div_resolution(input_resolution, self.stride())
    }
}

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Configures the size of `width` and `out_planes`.
    pub planes: usize,

    /// Control factor for `out_planes()`
    #[config(default = 4)]
    pub expansion_factor: usize,

    /// Groups of the 3x3 conv filters.
    #[config(default = 1)]
    pub cardinality: usize,

    /// Base width used to determine the inner width.
    #[config(default = 64)]
    pub base_width: usize,

    /// The stride of the 3x3 conv and the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate for the 3x3 conv.
    #[config(default = 1)]
    pub dilation: usize,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    ///
    /// The feature size of this config will be replaced
    /// with the appropriate feature size for each layer.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// [`crate::compat::activation_wrapper::Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn cardinality(&self) -> usize {
        self.cardinality
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BottleneckBlockConfig {
    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        let in_planes = self.in_planes();
        let width = self.width();
        let out_planes = self.out_planes();
        let dilation = self.dilation();
        let stride = self.stride();

        let downsample = if stride != 1 || in_planes != out_planes {
            Some(
                ConvDownsampleConfig::new(in_planes, out_planes)
                    .with_stride(stride)
                    .with_normalization(self.normalization.clone()),
            )
        } else {
            None
        };

        let cna_builder = AbstractCNA2dConfig {
            norm: self.normalization.clone(),
            act: self.activation.clone(),
        };

        let cna1: CNA2dConfig = cna_builder.build_config(
            Conv2dConfig::new([in_planes, width], [1, 1])
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(false),
        );

        let cna2: CNA2dConfig = cna_builder.build_config(
            Conv2dConfig::new([width, width], [3, 3])
                .with_stride(scalar_to_array(stride))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                .with_groups(self.cardinality())
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(false),
        );

        let cna3: CNA2dConfig = cna_builder.build_config(
            Conv2dConfig::new([width, out_planes], [1, 1])
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(false),
        );

        BottleneckBlock {
            base_width: self.base_width,
            expansion_factor: self.expansion_factor,

            downsample: downsample.map(|c| c.init(device)),

            cna1: cna1.init(device),
            cna2: cna2.init(device),
            cna3: cna3.init(device),
        }
    }
}

/// Bottleneck Block for `ResNet`.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Base width.
    pub base_width: usize,

    /// Expansion factor.
    pub expansion_factor: usize,

    /// Optional projection shortcut; for the residual connection.
    pub downsample: Option<ConvDownsample<B>>,

    /// First conv/norm/act layer.
    pub cna1: CNA2d<B>,
    /// Second conv/norm/act layer.
    pub cna2: CNA2d<B>,
    /// Third conv/norm/act layer; the residual is added before its activation.
    pub cna3: CNA2d<B>,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn dilation(&self) -> usize {
        self.cna2.dilation()[0]
    }

    fn planes(&self) -> usize {
        self.out_planes() / self.expansion_factor()
    }

    fn cardinality(&self) -> usize {
        self.cna2.groups()
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn width(&self) -> usize {
        self.cna3.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cna3.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna2.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height/stride), ceil(in_width/stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_planes", "in_height", "in_width"];
        let [batch, in_height, in_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        run_every_nth!({
            static IDENTITY_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_planes", "out_height", "out_width"];
            IDENTITY_CONTRACT.assert_shape(
                &identity,
                &[
                    ("batch", batch),
                    ("out_planes", self.out_planes()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ]
            );
        });

        let x = self.cna1.forward(input);
        let x = self.cna2.forward(x);
        self.cna3.hook_forward(x, |x| x + identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::NdArray;

    #[test]
    fn test_bottleneck_block_config() {
        let config = BottleneckBlockConfig::new(16, 8);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.planes(), 8);
        assert_eq!(config.width(), 8);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.output_resolution([16, 15]), [16, 15]);
        assert!(matches!(config.activation, ActivationConfig::Relu));

        let config = config
            .with_stride(2)
            .with_activation(ActivationConfig::Gelu);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
        assert_eq!(config.output_resolution([15, 7]), [8, 4]);
        assert!(matches!(config.activation, ActivationConfig::Gelu));

        let config = config.with_cardinality(2).with_base_width(128);
        assert_eq!(config.width(), 8 * 2 * 2);
        assert_eq!(config.out_planes(), 32);
    }

    #[test]
    fn test_bottleneck_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 4).init(&device);
        assert!(block.downsample.is_some());
        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.planes(), 4);
        assert_eq!(block.width(), 4);
        assert_eq!(block.out_planes(), 16);
        assert_eq!(block.stride(), 1);
        assert_eq!(block.cardinality(), 1);
        assert_eq!(block.dilation(), 1);

        // 8 in, 2 * 4 out, stride 1: no projection.
        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 2).init(&device);
        assert!(block.downsample.is_none());
        assert_eq!(block.out_planes(), 8);
    }

    #[test]
    fn test_bottleneck_identity_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(16, 4).init(&device);
        assert!(block.downsample.is_none());

        let input = Tensor::ones([2, 16, 5, 7], &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 16, 5, 7]);
    }

    #[test]
    fn test_bottleneck_forward_odd_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        let batch_size = 2;
        let in_planes = 4;
        let planes = 4;
        let in_height = 7;
        let in_width = 9;

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(in_planes, planes)
            .with_stride(2)
            .init(&device);
        assert!(block.downsample.is_some());

        let out_planes = block.out_planes();
        let [out_height, out_width] = block.output_resolution([in_height, in_width]);
        assert_eq!([out_height, out_width], [4, 5]);

        let input = Tensor::ones([batch_size, in_planes, in_height, in_width], &device);
        let output = block.forward(input);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_channels", "out_height", "out_width"];
        OUTPUT_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", batch_size),
                ("out_channels", out_planes),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        // Post-residual ReLU.
        let min = output.min().into_scalar();
        assert!(min >= 0.0, "min={min}");
    }
}
