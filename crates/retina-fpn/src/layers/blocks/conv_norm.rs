//! # `ConvNorm2d` Module
//!
//! A [`ConvNorm2d`] module is a [`Conv2d`] layer followed by a [`Normalization`] layer;
//! with no activation.

use crate::compat::conv_shape::{expect_conv_output_resolution, padding_config_values};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`Normalization`] config.
    ///
    /// The feature size is matched to the conv output on init.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl From<Conv2dConfig> for ConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_conv_output_resolution(
            input_resolution,
            self.conv.kernel_size,
            self.conv.stride,
            padding_config_values(&self.conv.padding, self.conv.kernel_size, self.conv.dilation),
            self.conv.dilation,
        )
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let features = self.out_channels();
        ConvNorm2d {
            conv: self.conv.init(device),
            norm: self.norm.with_num_features(features).init(device),
        }
    }
}

/// [`Conv2d`] and [`Normalization`] layer.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: Normalization<B>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_conv_output_resolution(
            input_resolution,
            self.conv.kernel_size,
            self.conv.stride,
            padding_config_values(&self.conv.padding.0, self.conv.kernel_size, self.conv.dilation),
            self.conv.dilation,
        )
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
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

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

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
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;

    #[test]
    fn test_conv_norm_config() {
        let inner_config = Conv2dConfig::new([2, 4], [1, 1])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false);

        let config: ConvNorm2dConfig = inner_config.clone().into();

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.output_resolution([9, 8]), [5, 4]);
    }

    #[test]
    fn test_conv_norm_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::from(
            Conv2dConfig::new([2, 4], [1, 1])
                .with_stride([2, 2])
                .with_bias(false),
        )
        .init(&device);
        assert_eq!(layer.norm.num_features(), 4);

        let output = layer.forward(Tensor::ones([3, 2, 9, 8], &device));
        assert_eq!(output.dims(), [3, 4, 5, 4]);
    }
}
