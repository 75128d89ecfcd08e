//! # The `ResNet` Projection Shortcut.
//!
//! [`ConvDownsample`] is the residual-path projection used when a block
//! changes its channel count or stride: a strided 1x1 conv and a norm.

use crate::compat::conv_shape::ceil_div_resolution;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::resnet::util::{CONV_INTO_RELU_INITIALIZER, scalar_to_array};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvDownsample`] Meta trait.
pub trait ConvDownsampleMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The stride of the downsample layer.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// A 1x1 window with no padding yields ``ceil(input / stride)``.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        ceil_div_resolution(input_resolution, self.stride())
    }
}

/// [`ConvDownsample`] configuration.
#[derive(Config, Debug)]
pub struct ConvDownsampleConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The stride of the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// The conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER")]
    pub initializer: Initializer,

    /// The norm config; feature size is auto-matched.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl ConvDownsampleMeta for ConvDownsampleConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ConvDownsampleConfig {
    /// Initialize a [`ConvDownsample`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvDownsample<B> {
        let config = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                .with_stride(scalar_to_array(self.stride))
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
        .with_norm(self.normalization.clone());

        ConvDownsample {
            conv_norm: config.init(device),
        }
    }
}

/// Projection shortcut: a strided 1x1 conv and a norm.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, out_channels, ceil(in_height/stride), ceil(in_width/stride)]`` tensors.
#[derive(Module, Debug)]
pub struct ConvDownsample<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm2d<B>,
}

impl<B: Backend> ConvDownsampleMeta for ConvDownsample<B> {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm.stride()[0]
    }
}

impl<B: Backend> ConvDownsample<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, in_channels, in_height, in_width]`` tensor.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "in_height", "in_width"];
        let [batch, in_height, in_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let out = self.conv_norm.forward(input);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_channels", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &out,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_height", out_height),
                    ("out_width", out_width)
                ]
            );
        });

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::NdArray;

    #[test]
    fn test_conv_downsample_config() {
        let config = ConvDownsampleConfig::new(2, 4);
        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.output_resolution([8, 7]), [8, 7]);

        let config = config.with_stride(2);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);
        assert_eq!(config.output_resolution([7, 9]), [4, 5]);
    }

    #[test]
    fn test_conv_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        let batch_size = 2;
        let in_channels = 2;
        let out_channels = 4;

        let downsample: ConvDownsample<B> = ConvDownsampleConfig::new(in_channels, out_channels)
            .with_stride(2)
            .init(&device);
        assert_eq!(downsample.in_channels(), in_channels);
        assert_eq!(downsample.out_channels(), out_channels);
        assert_eq!(downsample.stride(), 2);

        let tensor = Tensor::ones([batch_size, in_channels, 9, 6], &device);
        let out = downsample.forward(tensor);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_channels", "out_height", "out_width"];
        OUTPUT_CONTRACT.assert_shape(
            &out,
            &[
                ("batch", batch_size),
                ("out_channels", out_channels),
                ("out_height", 5),
                ("out_width", 3)
            ]
        );
    }
}
