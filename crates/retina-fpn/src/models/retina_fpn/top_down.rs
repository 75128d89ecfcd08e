//! # Top-Down Pyramid Path
//!
//! [`TopDown`] builds ``p3..p5`` from the ``c3..c5`` backbone features:
//!
//! ```text
//! p5 = top(c5)
//! p4 = smooth4(upsample_add(p5, lateral4(c4)))
//! p3 = smooth3(upsample_add(p4, lateral3(c3)))
//! ```
//!
//! The coarse map is always upsampled, then cropped to its lateral map;
//! see [`UpsampleAdd`].

use crate::compat::conv_shape::{
    conv2d_output_resolution, expect_conv_output_resolution, padding_config_values,
};
use crate::layers::blocks::upsample_add::{UpsampleAdd, UpsampleAddConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`TopDown`] Config.
#[derive(Config, Debug)]
pub struct TopDownConfig {
    /// The ``[c3, c4, c5]`` feature planes.
    pub in_planes: [usize; 3],

    /// The pyramid feature planes.
    #[config(default = 256)]
    pub planes: usize,

    /// The fusion config.
    #[config(default = "UpsampleAddConfig::new()")]
    pub fusion: UpsampleAddConfig,
}

impl TopDownConfig {
    /// The 1x1 channel-reducing conv.
    fn reduce_conv(
        in_planes: usize,
        planes: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new([in_planes, planes], [1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(true)
    }

    /// The 3x3 resolution-preserving smoothing conv.
    fn smooth_conv(planes: usize) -> Conv2dConfig {
        Conv2dConfig::new([planes, planes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(true)
    }

    /// Predict the ``[p3, p4, p5]`` resolutions.
    ///
    /// The fused levels take the resolution of their lateral input.
    pub fn output_resolutions(
        &self,
        c_resolutions: [[usize; 2]; 3],
    ) -> [[usize; 2]; 3] {
        let apply = |conv: Conv2dConfig, resolution: [usize; 2]| {
            expect_conv_output_resolution(
                resolution,
                conv.kernel_size,
                conv.stride,
                padding_config_values(&conv.padding, conv.kernel_size, conv.dilation),
                conv.dilation,
            )
        };
        let planes = self.planes;
        let [c3, c4, c5] = c_resolutions;
        let [c3_planes, c4_planes, c5_planes] = self.in_planes;
        [
            apply(
                Self::smooth_conv(planes),
                apply(Self::reduce_conv(c3_planes, planes), c3),
            ),
            apply(
                Self::smooth_conv(planes),
                apply(Self::reduce_conv(c4_planes, planes), c4),
            ),
            apply(Self::reduce_conv(c5_planes, planes), c5),
        ]
    }

    /// Initialize a [`TopDown`] module.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TopDown<B> {
        let [c3_planes, c4_planes, c5_planes] = self.in_planes;
        let planes = self.planes;

        TopDown {
            top: Self::reduce_conv(c5_planes, planes).init(device),
            lateral4: Self::reduce_conv(c4_planes, planes).init(device),
            lateral3: Self::reduce_conv(c3_planes, planes).init(device),
            smooth4: Self::smooth_conv(planes).init(device),
            smooth3: Self::smooth_conv(planes).init(device),
            fusion: self.fusion.init(),
        }
    }
}

/// Top-down / lateral pyramid path.
#[derive(Module, Debug)]
pub struct TopDown<B: Backend> {
    /// ``c5 -> p5`` channel reduction.
    pub top: Conv2d<B>,

    /// ``c4`` lateral channel reduction.
    pub lateral4: Conv2d<B>,

    /// ``c3`` lateral channel reduction.
    pub lateral3: Conv2d<B>,

    /// ``p4`` smoothing.
    pub smooth4: Conv2d<B>,

    /// ``p3`` smoothing.
    pub smooth3: Conv2d<B>,

    /// Upsample / crop / add fusion.
    pub fusion: UpsampleAdd,
}

impl<B: Backend> TopDown<B> {
    /// The ``[c3, c4, c5]`` feature planes.
    pub fn in_planes(&self) -> [usize; 3] {
        [
            self.lateral3.weight.dims()[1],
            self.lateral4.weight.dims()[1],
            self.top.weight.dims()[1],
        ]
    }

    /// The pyramid feature planes.
    pub fn planes(&self) -> usize {
        self.top.weight.dims()[0]
    }

    /// Predict the ``[p3, p4, p5]`` resolutions.
    ///
    /// The fused levels take the resolution of their lateral input.
    pub fn output_resolutions(
        &self,
        c_resolutions: [[usize; 2]; 3],
    ) -> [[usize; 2]; 3] {
        let [c3, c4, c5] = c_resolutions;
        [
            conv2d_output_resolution(&self.smooth3, conv2d_output_resolution(&self.lateral3, c3)),
            conv2d_output_resolution(&self.smooth4, conv2d_output_resolution(&self.lateral4, c4)),
            conv2d_output_resolution(&self.top, c5),
        ]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `c3`: ``[batch, c3_planes, h3, w3]``.
    /// - `c4`: ``[batch, c4_planes, h4, w4]``; where ``2 * h4 >= h3`` and ``2 * w4 >= w3``.
    /// - `c5`: ``[batch, c5_planes, h5, w5]``; where ``2 * h5 >= h4`` and ``2 * w5 >= w4``.
    ///
    /// # Returns
    ///
    /// ``(p3, p4, p5)``, each with `planes` channels at the
    /// resolution of the matching `c` input.
    pub fn forward(
        &self,
        c3: Tensor<B, 4>,
        c4: Tensor<B, 4>,
        c5: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        static FEATURE_CONTRACT: ShapeContract =
            shape_contract!["batch", "planes", "height", "width"];

        let [c3_planes, c4_planes, c5_planes] = self.in_planes();
        let [batch, h3, w3] = FEATURE_CONTRACT.unpack_shape(
            &c3,
            &["batch", "height", "width"],
            &[("planes", c3_planes)],
        );
        let [h4, w4] = FEATURE_CONTRACT.unpack_shape(
            &c4,
            &["height", "width"],
            &[("batch", batch), ("planes", c4_planes)],
        );
        let [h5, w5] = FEATURE_CONTRACT.unpack_shape(
            &c5,
            &["height", "width"],
            &[("batch", batch), ("planes", c5_planes)],
        );

        let p5 = self.top.forward(c5);

        let p4 = self.fusion.forward(p5.clone(), self.lateral4.forward(c4));
        let p4 = self.smooth4.forward(p4);

        let p3 = self.fusion.forward(p4.clone(), self.lateral3.forward(c3));
        let p3 = self.smooth3.forward(p3);

        let planes = self.planes();
        for (p, h, w) in [(&p3, h3, w3), (&p4, h4, w4), (&p5, h5, w5)] {
            run_every_nth!(FEATURE_CONTRACT.assert_shape(
                p,
                &[
                    ("batch", batch),
                    ("planes", planes),
                    ("height", h),
                    ("width", w)
                ]
            ));
        }

        (p3, p4, p5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_top_down_config() {
        let config = TopDownConfig::new([512, 1024, 2048]);
        assert_eq!(config.planes, 256);
        assert_eq!(config.fusion.scale_factor, 2);
        assert_eq!(
            config.output_resolutions([[15, 9], [8, 5], [4, 3]]),
            [[15, 9], [8, 5], [4, 3]]
        );
    }

    #[test]
    fn test_top_down_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: TopDown<B> = TopDownConfig::new([3, 5, 7]).with_planes(4).init(&device);
        assert_eq!(layer.in_planes(), [3, 5, 7]);
        assert_eq!(layer.planes(), 4);
        assert_eq!(
            layer.output_resolutions([[75, 38], [38, 19], [19, 10]]),
            [[75, 38], [38, 19], [19, 10]]
        );
    }

    #[test]
    fn test_top_down_forward_odd() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: TopDown<B> = TopDownConfig::new([3, 5, 7]).with_planes(4).init(&device);

        // All-odd lateral resolutions; each fusion must crop.
        let c3 = Tensor::random([2, 3, 15, 9], Distribution::Default, &device);
        let c4 = Tensor::random([2, 5, 8, 5], Distribution::Default, &device);
        let c5 = Tensor::random([2, 7, 4, 3], Distribution::Default, &device);

        let (p3, p4, p5) = layer.forward(c3, c4, c5);
        assert_eq!(p3.dims(), [2, 4, 15, 9]);
        assert_eq!(p4.dims(), [2, 4, 8, 5]);
        assert_eq!(p5.dims(), [2, 4, 4, 3]);
    }

    #[test]
    fn test_top_down_fusion_order() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: TopDown<B> = TopDownConfig::new([2, 2, 2]).with_planes(2).init(&device);

        let c3: Tensor<B, 4> = Tensor::random([1, 2, 5, 5], Distribution::Default, &device);
        let c4: Tensor<B, 4> = Tensor::random([1, 2, 3, 3], Distribution::Default, &device);
        let c5: Tensor<B, 4> = Tensor::random([1, 2, 2, 2], Distribution::Default, &device);

        let (p3, p4, p5) = layer.forward(c3.clone(), c4.clone(), c5.clone());

        let expected_p5 = layer.top.forward(c5);
        let expected_p4 = layer.smooth4.forward(
            layer
                .fusion
                .forward(expected_p5.clone(), layer.lateral4.forward(c4)),
        );
        let expected_p3 = layer.smooth3.forward(
            layer
                .fusion
                .forward(expected_p4.clone(), layer.lateral3.forward(c3)),
        );

        p5.to_data().assert_eq(&expected_p5.to_data(), true);
        p4.to_data().assert_eq(&expected_p4.to_data(), true);
        p3.to_data().assert_eq(&expected_p3.to_data(), true);
    }
}
