//! # `ResNet` Input Stem
//!
//! The stem is a 7x7 stride-2 conv/norm/act followed by a 3x3 stride-2
//! max-pool; an overall stride of 4.
//!
//! Both windows are padded so that any input size is accepted,
//! and each stage produces ``ceil(size / 2)``.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::conv_shape::{expect_conv_output_resolution, padding_config_values};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dMeta};
use crate::models::resnet::util::CONV_INTO_RELU_INITIALIZER;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// Stem max-pool kernel size.
pub const STEM_POOL_KERNEL: usize = 3;
/// Stem max-pool stride.
pub const STEM_POOL_STRIDE: usize = 2;
/// Stem max-pool padding.
pub const STEM_POOL_PADDING: usize = 1;

/// Output resolution of the stem max-pool.
fn pool_output_resolution(input_resolution: [usize; 2]) -> [usize; 2] {
    expect_conv_output_resolution(
        input_resolution,
        [STEM_POOL_KERNEL; 2],
        [STEM_POOL_STRIDE; 2],
        [STEM_POOL_PADDING; 2],
        [1, 1],
    )
}

/// [`ResNetStem`] Meta API.
pub trait ResNetStemMeta {
    /// The number of input image channels.
    fn in_channels(&self) -> usize;

    /// The number of output feature planes.
    fn out_channels(&self) -> usize;

    /// The overall stem stride.
    fn stride(&self) -> usize {
        4
    }

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// The number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The number of stem conv filters.
    #[config(default = 64)]
    pub stem_width: usize,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// [`crate::compat::activation_wrapper::Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl ResNetStemConfig {
    /// The stem conv config.
    fn conv_config(&self) -> Conv2dConfig {
        Conv2dConfig::new([self.in_channels, self.stem_width], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_initializer(CONV_INTO_RELU_INITIALIZER)
            .with_bias(false)
    }

    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        let cna = AbstractCNA2dConfig {
            norm: self.normalization.clone(),
            act: self.activation.clone(),
        }
        .build_config(self.conv_config());

        ResNetStem {
            cna: cna.init(device),
            pool: MaxPool2dConfig::new([STEM_POOL_KERNEL; 2])
                .with_strides([STEM_POOL_STRIDE; 2])
                .with_padding(PaddingConfig2d::Explicit(
                    STEM_POOL_PADDING,
                    STEM_POOL_PADDING,
                ))
                .init(),
        }
    }
}

impl ResNetStemMeta for ResNetStemConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.stem_width
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let conv = self.conv_config();
        let x = expect_conv_output_resolution(
            input_resolution,
            conv.kernel_size,
            conv.stride,
            padding_config_values(&conv.padding, conv.kernel_size, conv.dilation),
            conv.dilation,
        );
        pool_output_resolution(x)
    }
}

/// `ResNet` input stem.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// The 7x7 conv/norm/act.
    pub cna: CNA2d<B>,

    /// The max-pool.
    pub pool: MaxPool2d,
}

impl<B: Backend> ResNetStemMeta for ResNetStem<B> {
    fn in_channels(&self) -> usize {
        self.cna.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna.out_channels()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        pool_output_resolution(self.cna.output_resolution(input_resolution))
    }
}

impl<B: Backend> ResNetStem<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, ceil(height/4), ceil(width/4)]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "height", "width"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([height, width]);

        let x = self.cna.forward(input);
        let x = self.pool.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_channels", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ]
            );
        });

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::conv_shape::ceil_div_resolution;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stem_config() {
        let config = ResNetStemConfig::new();
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.stride(), 4);
        assert_eq!(config.output_resolution([600, 300]), [150, 75]);
        assert_eq!(config.output_resolution([1, 1]), [1, 1]);

        for height in 1..40usize {
            for width in [1usize, 2, 5, 13] {
                assert_eq!(
                    config.output_resolution([height, width]),
                    ceil_div_resolution([height, width], 4),
                );
            }
        }
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: ResNetStem<B> = ResNetStemConfig::new()
            .with_in_channels(2)
            .with_stem_width(4)
            .init(&device);
        assert_eq!(stem.in_channels(), 2);
        assert_eq!(stem.out_channels(), 4);

        let input = Tensor::random([2, 2, 13, 6], Distribution::Default, &device);
        let output = stem.forward(input);
        assert_eq!(output.dims(), [2, 4, 4, 2]);
    }
}
