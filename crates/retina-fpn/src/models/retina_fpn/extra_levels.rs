//! # Extra Pyramid Levels
//!
//! [`ExtraLevels`] extends the pyramid past the backbone:
//! * ``p6 = conv6(c5)``; a 3x3 stride-2 conv.
//! * ``p7 = conv7(relu(p6))``; a 3x3 stride-2 conv.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::{
    conv2d_output_resolution, expect_conv_output_resolution, padding_config_values,
};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`ExtraLevels`] Config.
#[derive(Config, Debug)]
pub struct ExtraLevelsConfig {
    /// The ``c5`` feature planes.
    pub in_planes: usize,

    /// The pyramid feature planes.
    #[config(default = 256)]
    pub planes: usize,

    /// The activation between ``p6`` and ``conv7``.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl ExtraLevelsConfig {
    /// A 3x3 stride-2 conv with bias.
    fn down_conv(
        in_planes: usize,
        planes: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new([in_planes, planes], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(true)
    }

    /// Predict the ``[p6, p7]`` resolutions for a ``c5`` resolution.
    pub fn output_resolutions(
        &self,
        c5_resolution: [usize; 2],
    ) -> [[usize; 2]; 2] {
        let conv = Self::down_conv(self.in_planes, self.planes);
        let apply = |resolution: [usize; 2]| {
            expect_conv_output_resolution(
                resolution,
                conv.kernel_size,
                conv.stride,
                padding_config_values(&conv.padding, conv.kernel_size, conv.dilation),
                conv.dilation,
            )
        };
        let p6 = apply(c5_resolution);
        [p6, apply(p6)]
    }

    /// Initialize an [`ExtraLevels`] module.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ExtraLevels<B> {
        ExtraLevels {
            conv6: Self::down_conv(self.in_planes, self.planes).init(device),
            act: self.activation.init(device),
            conv7: Self::down_conv(self.planes, self.planes).init(device),
        }
    }
}

/// The ``p6`` / ``p7`` pyramid levels.
#[derive(Module, Debug)]
pub struct ExtraLevels<B: Backend> {
    /// ``c5 -> p6``.
    pub conv6: Conv2d<B>,

    /// Applied to ``p6`` before ``conv7``.
    pub act: Activation<B>,

    /// ``p6 -> p7``.
    pub conv7: Conv2d<B>,
}

impl<B: Backend> ExtraLevels<B> {
    /// The ``c5`` feature planes.
    pub fn in_planes(&self) -> usize {
        self.conv6.weight.dims()[1]
    }

    /// The pyramid feature planes.
    pub fn planes(&self) -> usize {
        self.conv7.weight.dims()[0]
    }

    /// Predict the ``[p6, p7]`` resolutions for a ``c5`` resolution.
    pub fn output_resolutions(
        &self,
        c5_resolution: [usize; 2],
    ) -> [[usize; 2]; 2] {
        let p6 = conv2d_output_resolution(&self.conv6, c5_resolution);
        let p7 = conv2d_output_resolution(&self.conv7, p6);
        [p6, p7]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `c5`: ``[batch, in_planes, height, width]``.
    ///
    /// # Returns
    ///
    /// ``(p6, p7)``; ``[batch, planes, ceil(height/2), ceil(width/2)]``
    /// and ``[batch, planes, ceil(height/4), ceil(width/4)]``.
    pub fn forward(
        &self,
        c5: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_planes", "height", "width"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &c5,
            &["batch", "height", "width"],
            &[("in_planes", self.in_planes())]
        );
        let [[p6_height, p6_width], [p7_height, p7_width]] =
            self.output_resolutions([height, width]);

        let p6 = self.conv6.forward(c5);
        let p7 = self.conv7.forward(self.act.forward(p6.clone()));

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "planes", "height", "width"];
        let planes = self.planes();
        run_every_nth!({
            OUTPUT_CONTRACT.assert_shape(
                &p6,
                &[
                    ("batch", batch),
                    ("planes", planes),
                    ("height", p6_height),
                    ("width", p6_width)
                ]
            );
            OUTPUT_CONTRACT.assert_shape(
                &p7,
                &[
                    ("batch", batch),
                    ("planes", planes),
                    ("height", p7_height),
                    ("width", p7_width)
                ]
            );
        });

        (p6, p7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_extra_levels_config() {
        let config = ExtraLevelsConfig::new(2048);
        assert_eq!(config.in_planes, 2048);
        assert_eq!(config.planes, 256);
        assert!(matches!(config.activation, ActivationConfig::Relu));
        assert_eq!(config.output_resolutions([19, 10]), [[10, 5], [5, 3]]);
        assert_eq!(config.output_resolutions([2, 1]), [[1, 1], [1, 1]]);
    }

    #[test]
    fn test_extra_levels_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ExtraLevels<B> = ExtraLevelsConfig::new(6).with_planes(4).init(&device);
        assert_eq!(layer.in_planes(), 6);
        assert_eq!(layer.planes(), 4);
        assert_eq!(layer.output_resolutions([19, 10]), [[10, 5], [5, 3]]);
        assert_eq!(layer.output_resolutions([1, 1]), [[1, 1], [1, 1]]);

        let c5 = Tensor::random([2, 6, 19, 10], Distribution::Default, &device);
        let (p6, p7) = layer.forward(c5);
        assert_eq!(p6.dims(), [2, 4, 10, 5]);
        assert_eq!(p7.dims(), [2, 4, 5, 3]);
    }

    #[test]
    fn test_extra_levels_relu_between() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ExtraLevels<B> = ExtraLevelsConfig::new(3).with_planes(2).init(&device);
        let c5: Tensor<B, 4> = Tensor::random([1, 3, 7, 7], Distribution::Default, &device);

        let (p6, p7) = layer.forward(c5.clone());
        let expected = layer
            .conv7
            .forward(burn::tensor::activation::relu(layer.conv6.forward(c5)));
        p7.to_data().assert_eq(&expected.to_data(), true);

        // p6 itself is not activated.
        assert_eq!(p6.dims(), [1, 2, 4, 4]);
    }
}
