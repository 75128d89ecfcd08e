//! # `ResNet` Feature Backbone
//!
//! [`ResNetBackbone`] is a headless `ResNet`: a [`ResNetStem`] and four
//! [`LayerBlock`] stages. It returns the output of every stage; the
//! ``c2..c5`` features at strides ``4, 8, 16, 32``.
//!
//! [`ResNetBackboneConfig::build`] constructs the four-stage layout;
//! stage strides are ``1, 2, 2, 2``, and the standard stage widths are
//! ``64, 128, 256, 512``.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::resnet::residual_block::ResidualBlockConfig;
use crate::models::resnet::stem::{ResNetStem, ResNetStemConfig, ResNetStemMeta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Standard per-stage base widths.
pub const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Per-stage first-block strides.
pub const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// The four stage outputs of a [`ResNetBackbone`].
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    /// Stage 1 output; stride 4.
    pub c2: Tensor<B, 4>,

    /// Stage 2 output; stride 8.
    pub c3: Tensor<B, 4>,

    /// Stage 3 output; stride 16.
    pub c4: Tensor<B, 4>,

    /// Stage 4 output; stride 32.
    pub c5: Tensor<B, 4>,
}

/// [`ResNetBackbone`] Meta API.
pub trait ResNetBackboneMeta {
    /// The number of input image channels.
    fn in_channels(&self) -> usize;

    /// The output planes of each stage.
    fn stage_planes(&self) -> [usize; 4];

    /// The output resolution of each stage, for a given input resolution.
    fn stage_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; 4];
}

/// [`ResNetBackbone`] Config.
#[derive(Config, Debug)]
pub struct ResNetBackboneConfig {
    /// The input stem.
    pub stem: ResNetStemConfig,

    /// The four stages.
    pub layers: Vec<LayerBlockConfig>,
}

impl ResNetBackboneConfig {
    /// Build a four-stage layout, at strides [`STAGE_STRIDES`].
    ///
    /// A zero depth yields an empty stage, which [`Self::try_validate`] rejects.
    ///
    /// # Arguments
    ///
    /// - `stem`: the stem config.
    /// - `depths`: the number of blocks in each stage.
    /// - `planes`: the base width of each stage; see [`STAGE_PLANES`].
    /// - `bottleneck`: use bottleneck blocks; otherwise basic blocks.
    /// - `normalization`: the block norm policy.
    /// - `activation`: the block activation policy.
    pub fn build(
        stem: ResNetStemConfig,
        depths: [usize; 4],
        planes: [usize; 4],
        bottleneck: bool,
        normalization: NormalizationConfig,
        activation: ActivationConfig,
    ) -> Self {
        let mut in_planes = stem.out_channels();
        let mut layers = Vec::with_capacity(4);
        for idx in 0..4 {
            let layer = LayerBlockConfig::build(
                depths[idx],
                in_planes,
                planes[idx],
                STAGE_STRIDES[idx],
                bottleneck,
            )
            .map_blocks(&mut |_, block: ResidualBlockConfig| {
                block
                    .with_normalization(normalization.clone())
                    .with_activation(activation.clone())
            });
            if !layer.is_empty() {
                in_planes = layer.out_planes();
            }
            layers.push(layer);
        }

        Self { stem, layers }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.layers.len() != 4 {
            return Err(format!("expected 4 stages, found {}", self.layers.len()));
        }

        let mut planes = self.stem.out_channels();
        for (idx, layer) in self.layers.iter().enumerate() {
            layer
                .try_validate()
                .map_err(|err| format!("stage[{idx}]: {err}"))?;
            if layer.in_planes() != planes {
                return Err(format!(
                    "stage[{idx}].in_planes({}) != {planes}",
                    layer.in_planes()
                ));
            }
            planes = layer.out_planes();
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`ResNetBackbone`].
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResNetBackbone<B> {
        self.expect_valid();

        ResNetBackbone {
            stem: self.stem.init(device),
            layers: self
                .layers
                .into_iter()
                .map(|layer| layer.init(device))
                .collect(),
        }
    }
}

impl ResNetBackboneMeta for ResNetBackboneConfig {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn stage_planes(&self) -> [usize; 4] {
        core::array::from_fn(|idx| self.layers[idx].out_planes())
    }

    fn stage_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; 4] {
        let mut resolution = self.stem.output_resolution(input_resolution);
        core::array::from_fn(|idx| {
            resolution = self.layers[idx].output_resolution(resolution);
            resolution
        })
    }
}

/// Headless `ResNet` backbone.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    /// The input stem.
    pub stem: ResNetStem<B>,

    /// The four stages.
    pub layers: Vec<LayerBlock<B>>,
}

impl<B: Backend> ResNetBackboneMeta for ResNetBackbone<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn stage_planes(&self) -> [usize; 4] {
        core::array::from_fn(|idx| self.layers[idx].out_planes())
    }

    fn stage_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> [[usize; 2]; 4] {
        let mut resolution = self.stem.output_resolution(input_resolution);
        core::array::from_fn(|idx| {
            resolution = self.layers[idx].output_resolution(resolution);
            resolution
        })
    }
}

impl<B: Backend> ResNetBackbone<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// The [`BackboneFeatures`] of the four stages.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> BackboneFeatures<B> {
        run_every_nth!({
            static INPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "in_channels", "height", "width"];
            INPUT_CONTRACT.assert_shape(
                &input,
                &[("in_channels", self.in_channels())]
            );
        });

        let x = self.stem.forward(input);
        let c2 = self.layers[0].forward(x);
        let c3 = self.layers[1].forward(c2.clone());
        let c4 = self.layers[2].forward(c3.clone());
        let c5 = self.layers[3].forward(c4.clone());

        BackboneFeatures { c2, c3, c4, c5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    #[test]
    fn test_backbone_config_build() {
        let config = ResNetBackboneConfig::build(
            ResNetStemConfig::new(),
            [3, 4, 6, 3],
            STAGE_PLANES,
            true,
            NormalizationConfig::default(),
            ActivationConfig::Relu,
        );
        assert!(config.try_validate().is_ok());
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.stage_planes(), [256, 512, 1024, 2048]);

        let lens: Vec<usize> = config.layers.iter().map(|l| l.len()).collect();
        assert_that!(lens, equal_to(vec![3, 4, 6, 3]));

        assert_eq!(
            config.stage_resolutions([600, 300]),
            [[150, 75], [75, 38], [38, 19], [19, 10]]
        );

        let config = ResNetBackboneConfig::build(
            ResNetStemConfig::new(),
            [2, 2, 2, 2],
            STAGE_PLANES,
            false,
            NormalizationConfig::default(),
            ActivationConfig::Relu,
        );
        assert_eq!(config.stage_planes(), [64, 128, 256, 512]);
    }

    #[test]
    fn test_backbone_try_validate() {
        let config = ResNetBackboneConfig::new(
            ResNetStemConfig::new(),
            vec![LayerBlockConfig::build(1, 64, 64, 1, true)],
        );
        assert_eq!(
            config.try_validate(),
            Err("expected 4 stages, found 1".to_string())
        );

        let config = ResNetBackboneConfig::new(
            ResNetStemConfig::new().with_stem_width(32),
            vec![
                LayerBlockConfig::build(1, 64, 64, 1, true),
                LayerBlockConfig::build(1, 256, 128, 2, true),
                LayerBlockConfig::build(1, 512, 256, 2, true),
                LayerBlockConfig::build(1, 1024, 512, 2, true),
            ],
        );
        assert_eq!(
            config.try_validate(),
            Err("stage[0].in_planes(64) != 32".to_string())
        );
    }

    #[test]
    fn test_backbone_build_zero_depth() {
        let config = ResNetBackboneConfig::build(
            ResNetStemConfig::new(),
            [3, 0, 6, 3],
            STAGE_PLANES,
            true,
            NormalizationConfig::default(),
            ActivationConfig::Relu,
        );
        assert!(config.layers[1].is_empty());
        assert_eq!(config.stage_planes(), [256, 0, 1024, 2048]);
        assert_eq!(config.layers[2].in_planes(), 256);
        assert_eq!(
            config.try_validate(),
            Err("stage[1]: blocks is empty".to_string())
        );
    }

    #[test]
    #[should_panic(expected = "stage[1]: blocks is empty")]
    fn test_backbone_expect_valid() {
        ResNetBackboneConfig::new(
            ResNetStemConfig::new(),
            vec![
                LayerBlockConfig::build(1, 64, 64, 1, true),
                LayerBlockConfig::new(vec![]),
                LayerBlockConfig::build(1, 256, 128, 2, true),
                LayerBlockConfig::build(1, 512, 256, 2, true),
            ],
        )
        .expect_valid();
    }

    #[test]
    fn test_backbone_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResNetBackboneConfig::build(
            ResNetStemConfig::new().with_stem_width(4),
            [1, 2, 1, 1],
            [4, 8, 8, 16],
            false,
            NormalizationConfig::default(),
            ActivationConfig::Relu,
        );
        let expected_resolutions = config.stage_resolutions([37, 19]);
        assert_eq!(expected_resolutions, [[10, 5], [5, 3], [3, 2], [2, 1]]);

        let backbone: ResNetBackbone<B> = config.init(&device);
        let planes = backbone.stage_planes();
        assert_eq!(planes, [4, 8, 8, 16]);

        let features = backbone.forward(Tensor::ones([1, 3, 37, 19], &device));
        let shapes = [
            features.c2.dims(),
            features.c3.dims(),
            features.c4.dims(),
            features.c5.dims(),
        ];
        for idx in 0..4 {
            let [h, w] = expected_resolutions[idx];
            assert_eq!(shapes[idx], [1, planes[idx], h, w]);
        }
    }
}
