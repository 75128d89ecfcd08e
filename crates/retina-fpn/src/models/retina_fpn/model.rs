//! # `RetinaFpn` Core Model
//!
//! [`RetinaFpn`] is the core feature pyramid module.
//!
//! [`RetinaFpnAbstractConfig`] implements [`Config`], and provides
//! a high-level configuration interface.
//! It provides [`RetinaFpnAbstractConfig::to_structure`] to convert
//! to a [`RetinaFpnConfig`].
//!
//! [`RetinaFpnConfig`] implements [`Config`], and provides
//! [`RetinaFpnConfig::init`] to initialize a [`RetinaFpn`].
//!
//! [`RetinaFpn`] implements [`Module`], and provides
//! [`RetinaFpn::forward`].

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::resnet::backbone::{
    ResNetBackbone, ResNetBackboneConfig, ResNetBackboneMeta, STAGE_PLANES,
};
use crate::models::resnet::stem::ResNetStemConfig;
use crate::models::retina_fpn::extra_levels::{ExtraLevels, ExtraLevelsConfig};
use crate::models::retina_fpn::pyramid::FeaturePyramid;
use crate::models::retina_fpn::top_down::{TopDown, TopDownConfig};
use bimm_contracts::{ShapeContract, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// High-level `RetinaFpn` model configuration.
#[derive(Config, Debug)]
pub struct RetinaFpnAbstractConfig {
    /// Backbone stage depths.
    pub layers: [usize; 4],

    /// Use bottleneck blocks; otherwise basic blocks.
    #[config(default = "true")]
    pub bottleneck: bool,

    /// Number of input image channels.
    #[config(default = "3")]
    pub in_channels: usize,

    /// Number of channels in the stem convolution.
    #[config(default = "64")]
    pub stem_width: usize,

    /// Base width of each backbone stage.
    #[config(default = "STAGE_PLANES")]
    pub stage_planes: [usize; 4],

    /// Number of channels in every pyramid level.
    #[config(default = "256")]
    pub fpn_planes: usize,

    /// Backbone normalization policy.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Backbone (and ``p6 -> p7``) activation policy.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl From<RetinaFpnAbstractConfig> for RetinaFpnConfig {
    fn from(config: RetinaFpnAbstractConfig) -> Self {
        let backbone = ResNetBackboneConfig::build(
            ResNetStemConfig::new()
                .with_in_channels(config.in_channels)
                .with_stem_width(config.stem_width)
                .with_normalization(config.normalization.clone())
                .with_activation(config.activation.clone()),
            config.layers,
            config.stage_planes,
            config.bottleneck,
            config.normalization,
            config.activation.clone(),
        );

        let [_c2, c3, c4, c5] = backbone.stage_planes();

        RetinaFpnConfig::new(
            backbone,
            ExtraLevelsConfig::new(c5)
                .with_planes(config.fpn_planes)
                .with_activation(config.activation),
            TopDownConfig::new([c3, c4, c5]).with_planes(config.fpn_planes),
        )
    }
}

impl RetinaFpnAbstractConfig {
    /// Convert to a [`RetinaFpnConfig`].
    pub fn to_structure(self) -> RetinaFpnConfig {
        self.into()
    }

    /// Initialize a [`RetinaFpn`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> RetinaFpn<B> {
        self.to_structure().init(device)
    }
}

/// [`RetinaFpn`] Structure Config.
///
/// This config defines the structure of a converted `RetinaFpn` model.
/// [`RetinaFpnConfig::try_validate`] checks the internal sizes.
#[derive(Config, Debug)]
pub struct RetinaFpnConfig {
    /// The `ResNet` backbone.
    pub backbone: ResNetBackboneConfig,

    /// The ``p6`` / ``p7`` levels.
    pub extra_levels: ExtraLevelsConfig,

    /// The ``p3..p5`` top-down path.
    pub top_down: TopDownConfig,
}

impl RetinaFpnConfig {
    /// The number of input image channels.
    pub fn in_channels(&self) -> usize {
        self.backbone.in_channels()
    }

    /// The number of channels in every pyramid level.
    pub fn fpn_planes(&self) -> usize {
        self.top_down.planes
    }

    /// Predict the ``[p3, p4, p5, p6, p7]`` resolutions for an input resolution.
    ///
    /// Level `i` is ``ceil(input / PYRAMID_STRIDES[i])``.
    ///
    /// [`PYRAMID_STRIDES`]: crate::models::retina_fpn::pyramid::PYRAMID_STRIDES
    pub fn output_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; 5] {
        let [_c2, c3, c4, c5] = self.backbone.stage_resolutions(input_resolution);
        let [p3, p4, p5] = self.top_down.output_resolutions([c3, c4, c5]);
        let [p6, p7] = self.extra_levels.output_resolutions(c5);
        [p3, p4, p5, p6, p7]
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        self.backbone
            .try_validate()
            .map_err(|err| format!("backbone: {err}"))?;

        let [_c2, c3, c4, c5] = self.backbone.stage_planes();
        if self.top_down.in_planes != [c3, c4, c5] {
            return Err(format!(
                "top_down.in_planes({:?}) != backbone [c3, c4, c5] planes({:?})",
                self.top_down.in_planes,
                [c3, c4, c5],
            ));
        }
        if self.extra_levels.in_planes != c5 {
            return Err(format!(
                "extra_levels.in_planes({}) != backbone c5 planes({c5})",
                self.extra_levels.in_planes,
            ));
        }
        if self.extra_levels.planes != self.top_down.planes {
            return Err(format!(
                "extra_levels.planes({}) != top_down.planes({})",
                self.extra_levels.planes, self.top_down.planes,
            ));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`RetinaFpn`] model.
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> RetinaFpn<B> {
        self.expect_valid();

        let model = RetinaFpn {
            backbone: self.backbone.init(device),
            extra_levels: self.extra_levels.init(device),
            top_down: self.top_down.init(device),
        };

        tracing::debug!(
            num_params = model.num_params(),
            fpn_planes = model.fpn_planes(),
            "initialized RetinaFpn"
        );

        model
    }
}

/// `RetinaNet` feature pyramid network.
#[derive(Module, Debug)]
pub struct RetinaFpn<B: Backend> {
    /// The `ResNet` backbone.
    pub backbone: ResNetBackbone<B>,

    /// The ``p6`` / ``p7`` levels.
    pub extra_levels: ExtraLevels<B>,

    /// The ``p3..p5`` top-down path.
    pub top_down: TopDown<B>,
}

impl<B: Backend> RetinaFpn<B> {
    /// The number of input image channels.
    pub fn in_channels(&self) -> usize {
        self.backbone.in_channels()
    }

    /// The number of channels in every pyramid level.
    pub fn fpn_planes(&self) -> usize {
        self.top_down.planes()
    }

    /// Predict the ``[p3, p4, p5, p6, p7]`` resolutions for an input resolution.
    pub fn output_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; 5] {
        let [_c2, c3, c4, c5] = self.backbone.stage_resolutions(input_resolution);
        let [p3, p4, p5] = self.top_down.output_resolutions([c3, c4, c5]);
        let [p6, p7] = self.extra_levels.output_resolutions(c5);
        [p3, p4, p5, p6, p7]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``; any ``height, width >= 1``.
    ///
    /// # Returns
    ///
    /// The [`FeaturePyramid`]; level `i` is
    /// ``[batch, fpn_planes, ceil(height/stride_i), ceil(width/stride_i)]``.
    #[tracing::instrument(skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> FeaturePyramid<B> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "in_channels", "height", "width"];
        let [batch, height, width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );
        tracing::debug!(batch, height, width, "forward");

        let features = self.backbone.forward(input);
        let (p6, p7) = self.extra_levels.forward(features.c5.clone());
        let (p3, p4, p5) = self.top_down.forward(features.c3, features.c4, features.c5);

        let pyramid = FeaturePyramid { p3, p4, p5, p6, p7 };
        tracing::debug!(shapes = ?pyramid.shapes(), "pyramid");

        pyramid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::conv_shape::ceil_div_resolution;
    use crate::models::retina_fpn::pyramid::PYRAMID_STRIDES;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    /// A narrow network; for fast forward passes.
    fn tiny_config(bottleneck: bool) -> RetinaFpnAbstractConfig {
        RetinaFpnAbstractConfig::new([1, 2, 1, 1])
            .with_bottleneck(bottleneck)
            .with_stem_width(4)
            .with_stage_planes([2, 4, 4, 8])
            .with_fpn_planes(6)
    }

    #[test]
    fn test_abstract_config_defaults() {
        let config = RetinaFpnAbstractConfig::new([3, 4, 6, 3]);
        assert!(config.bottleneck);
        assert_eq!(config.in_channels, 3);
        assert_eq!(config.stem_width, 64);
        assert_eq!(config.stage_planes, [64, 128, 256, 512]);
        assert_eq!(config.fpn_planes, 256);
        assert!(matches!(config.activation, ActivationConfig::Relu));
    }

    #[test]
    fn test_abstract_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retina_fpn.json");

        let config = tiny_config(false).with_in_channels(1);
        config.save(&path).unwrap();

        let loaded = RetinaFpnAbstractConfig::load(&path).unwrap();
        assert_eq!(loaded.layers, [1, 2, 1, 1]);
        assert!(!loaded.bottleneck);
        assert_eq!(loaded.in_channels, 1);
        assert_eq!(loaded.stem_width, 4);
        assert_eq!(loaded.stage_planes, [2, 4, 4, 8]);
        assert_eq!(loaded.fpn_planes, 6);

        let structure = loaded.to_structure();
        assert!(structure.try_validate().is_ok());
        assert_eq!(structure.in_channels(), 1);
    }

    #[test]
    fn test_to_structure() {
        let config = RetinaFpnAbstractConfig::new([3, 4, 6, 3]).to_structure();
        assert!(config.try_validate().is_ok());
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.fpn_planes(), 256);
        assert_eq!(config.backbone.stage_planes(), [256, 512, 1024, 2048]);
        assert_eq!(config.top_down.in_planes, [512, 1024, 2048]);
        assert_eq!(config.extra_levels.in_planes, 2048);
        assert_eq!(config.extra_levels.planes, 256);

        let config = RetinaFpnAbstractConfig::new([2, 2, 2, 2])
            .with_bottleneck(false)
            .to_structure();
        assert!(config.try_validate().is_ok());
        assert_eq!(config.backbone.stage_planes(), [64, 128, 256, 512]);
        assert_eq!(config.top_down.in_planes, [128, 256, 512]);
    }

    #[test]
    fn test_try_validate() {
        let config = RetinaFpnAbstractConfig::new([3, 4, 6, 3]).to_structure();

        let bad = RetinaFpnConfig {
            top_down: TopDownConfig::new([1, 2, 3]),
            ..config.clone()
        };
        assert_that!(
            bad.try_validate().unwrap_err(),
            equal_to(
                "top_down.in_planes([1, 2, 3]) != backbone [c3, c4, c5] planes([512, 1024, 2048])"
                    .to_string()
            )
        );

        let bad = RetinaFpnConfig {
            extra_levels: ExtraLevelsConfig::new(7),
            ..config.clone()
        };
        assert_eq!(
            bad.try_validate(),
            Err("extra_levels.in_planes(7) != backbone c5 planes(2048)".to_string())
        );

        let bad = RetinaFpnConfig {
            extra_levels: ExtraLevelsConfig::new(2048).with_planes(128),
            ..config
        };
        assert_eq!(
            bad.try_validate(),
            Err("extra_levels.planes(128) != top_down.planes(256)".to_string())
        );
    }

    #[test]
    fn test_zero_depth_stage() {
        let config = RetinaFpnAbstractConfig::new([3, 0, 6, 3]).to_structure();
        assert_eq!(
            config.try_validate(),
            Err("backbone: stage[1]: blocks is empty".to_string())
        );
    }

    #[test]
    #[should_panic(expected = "backbone: stage[0]: blocks is empty")]
    fn test_init_zero_depth() {
        type B = NdArray<f32>;
        let device = Default::default();

        let _model: RetinaFpn<B> = RetinaFpnAbstractConfig::new([0, 2, 1, 1])
            .with_stem_width(4)
            .with_stage_planes([2, 4, 4, 8])
            .with_fpn_planes(6)
            .init(&device);
    }

    #[test]
    #[should_panic(expected = "Shape Error:: 4 !~ in_channels :: Value MissMatch.")]
    fn test_forward_wrong_channels() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: RetinaFpn<B> = tiny_config(true).init(&device);
        let _ = model.forward(Tensor::zeros([1, 4, 33, 17], &device));
    }

    #[test]
    #[should_panic(expected = "extra_levels.in_planes(7)")]
    fn test_init_invalid() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = RetinaFpnConfig {
            extra_levels: ExtraLevelsConfig::new(7).with_planes(6),
            ..tiny_config(true).to_structure()
        };
        let _model: RetinaFpn<B> = config.init(&device);
    }

    #[test]
    fn test_output_resolutions_600x300() {
        let config = RetinaFpnAbstractConfig::new([2, 4, 23, 3]).to_structure();
        assert_eq!(
            config.output_resolutions([600, 300]),
            [[75, 38], [38, 19], [19, 10], [10, 5], [5, 3]]
        );

        let resolutions = config.output_resolutions([600, 300]);
        for idx in 1..5 {
            let [h0, w0] = resolutions[idx - 1];
            let [h1, w1] = resolutions[idx];
            assert!(h1 < h0 && w1 < w0, "{resolutions:?}");
        }
    }

    #[test]
    fn test_output_resolutions_ceil_div() {
        let config = RetinaFpnAbstractConfig::new([3, 4, 6, 3]).to_structure();

        for height in 1..160usize {
            for width in [1usize, 2, 3, 31, 64, 65, 127, 129, 300, 301] {
                let resolutions = config.output_resolutions([height, width]);
                for (idx, stride) in PYRAMID_STRIDES.iter().enumerate() {
                    assert_eq!(
                        resolutions[idx],
                        ceil_div_resolution([height, width], *stride),
                        "height={height} width={width} stride={stride}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_forward_odd_input() {
        type B = NdArray<f32>;
        let device = Default::default();

        for bottleneck in [true, false] {
            let config = tiny_config(bottleneck).to_structure();
            let model: RetinaFpn<B> = config.clone().init(&device);
            assert_eq!(model.fpn_planes(), 6);
            assert_eq!(model.in_channels(), 3);

            let input_resolution = [37, 19];
            let expected = config.output_resolutions(input_resolution);
            assert_eq!(model.output_resolutions(input_resolution), expected);

            let input = Tensor::random([2, 3, 37, 19], Distribution::Default, &device);
            let pyramid = model.forward(input);

            let shapes = pyramid.shapes();
            for idx in 0..5 {
                let [h, w] = expected[idx];
                assert_eq!(shapes[idx], [2, 6, h, w]);
            }
            assert_eq!(
                shapes,
                [
                    [2, 6, 5, 3],
                    [2, 6, 3, 2],
                    [2, 6, 2, 1],
                    [2, 6, 1, 1],
                    [2, 6, 1, 1]
                ]
            );
        }
    }

    #[test]
    fn test_forward_parity_grid() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: RetinaFpn<B> = tiny_config(false).init(&device);

        for height in [1usize, 8, 15, 33] {
            for width in [1usize, 9, 16, 31] {
                let input = Tensor::random([1, 3, height, width], Distribution::Default, &device);
                let shapes = model.forward(input).shapes();
                for (idx, stride) in PYRAMID_STRIDES.iter().enumerate() {
                    let [h, w] = ceil_div_resolution([height, width], *stride);
                    assert_eq!(shapes[idx], [1, 6, h, w], "input=[{height}, {width}]");
                }
            }
        }
    }
}
