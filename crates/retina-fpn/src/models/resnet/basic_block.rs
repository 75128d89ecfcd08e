//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the two-conv `ResNet` unit used by the shallow
//! (18 and 34 layer) backbones:
//!
//! ```text
//! x -> 3x3 (strided) conv/norm/act -> 3x3 conv/norm -> (+ shortcut) -> act
//! ```
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].

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

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// Dilation rate for conv layers.
    fn dilation(&self) -> usize;

    /// Configures the size of `out_planes`.
    fn planes(&self) -> usize;

    /// Control factor for `out_planes()`
    fn expansion_factor(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// The stride of the first conv.
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

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Configures the `out_planes` as a function of `expansion_factor`.
    pub planes: usize,

    /// Control factor for `out_planes()`
    #[config(default = 1)]
    pub expansion_factor: usize,

    /// The stride of the first conv and the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate for conv layers.
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

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        let in_planes = self.in_planes();
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
            Conv2dConfig::new([in_planes, out_planes], scalar_to_array(3))
                .with_stride(scalar_to_array(stride))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(false),
        );

        let cna2: CNA2dConfig = cna_builder.build_config(
            Conv2dConfig::new([out_planes, out_planes], scalar_to_array(3))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(false),
        );

        BasicBlock {
            expansion_factor: self.expansion_factor,

            downsample: downsample.map(|cfg| cfg.init(device)),

            cna1: cna1.init(device),
            cna2: cna2.init(device),
        }
    }
}

/// Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// Expansion factor.
    pub expansion_factor: usize,

    /// Optional projection shortcut.
    pub downsample: Option<ConvDownsample<B>>,

    /// First conv/norm/act layer.
    pub cna1: CNA2d<B>,

    /// Second conv/norm/act layer.
    pub cna2: CNA2d<B>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn dilation(&self) -> usize {
        self.cna2.dilation()[0]
    }

    fn planes(&self) -> usize {
        self.out_planes() / self.expansion_factor
    }

    fn expansion_factor(&self) -> usize {
        self.expansion_factor
    }

    fn out_planes(&self) -> usize {
        self.cna2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
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

        let x = self.cna1.forward(input);
        let x = self.cna2.hook_forward(x, |x| x + identity);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_planes", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("out_planes", self.out_planes()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ]
            );
        });

        x
    }
}
