//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a sequence of [`ResidualBlock`]s; one backbone stage.
//!
//! [`LayerBlockMeta`] defines a common meta API for [`LayerBlock`]
//! and [`LayerBlockConfig`].
//!
//! [`LayerBlockConfig`] implements [`Config`], and provides
//! [`LayerBlockConfig::init`] to initialize a [`LayerBlock`].
//!
//! [`LayerBlock`] implements [`Module`], and provides
//! [`LayerBlock::forward`].

use crate::compat::conv_shape::ceil_div_resolution;
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Meta API.
pub trait LayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes; 0 for an empty stage.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes; 0 for an empty stage.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the layers.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// Chained ceil-division by each block stride is ceil-division
    /// by their product.
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

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for LayerBlockConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |block| block.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |block| block.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl LayerBlockConfig {
    /// Build a stage config.
    ///
    /// The first block takes `in_planes` at `stride`;
    /// the following blocks take the first block's output at stride 1.
    ///
    /// # Arguments
    ///
    /// - `num_blocks`: the number of residual blocks.
    /// - `in_planes`: the stage input planes.
    /// - `planes`: the stage width.
    /// - `stride`: the stride of the first block.
    /// - `bottleneck`: select bottleneck blocks.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
    ) -> Self {
        let mut blocks: Vec<ResidualBlockConfig> = Vec::with_capacity(num_blocks);
        let mut current_planes = in_planes;
        for b in 0..num_blocks {
            let block_stride = if b == 0 { stride } else { 1 };
            let block =
                ResidualBlockConfig::build(current_planes, planes, block_stride, bottleneck);
            current_planes = block.out_planes();
            blocks.push(block);
        }

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                    self,
                ));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a new [`LayerBlock`].
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        self.expect_valid();

        LayerBlock {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, ResidualBlockConfig) -> ResidualBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |block| block.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |block| block.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> LayerBlock<B> {
    /// Apply the layer block.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

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
                ],
            );
        });

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_layer_block_config_build() {
        let config = LayerBlockConfig::build(3, 64, 64, 1, true);
        assert_eq!(config.len(), 3);
        assert!(!config.is_empty());
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.out_planes(), 256);
        assert_eq!(config.stride(), 1);
        assert!(config.try_validate().is_ok());

        assert_eq!(config.blocks[1].in_planes(), 256);
        assert_eq!(config.blocks[1].stride(), 1);

        let config = LayerBlockConfig::build(4, 256, 128, 2, true);
        assert_eq!(config.in_planes(), 256);
        assert_eq!(config.out_planes(), 512);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.blocks[0].stride(), 2);
        assert_eq!(config.output_resolution([75, 38]), [38, 19]);

        let config = LayerBlockConfig::build(2, 64, 128, 2, false);
        assert_eq!(config.out_planes(), 128);
        assert_eq!(config.blocks[1].in_planes(), 128);
    }

    #[test]
    fn test_layer_block_try_validate() {
        let config = LayerBlockConfig::new(vec![]);
        assert_eq!(config.try_validate(), Err("blocks is empty".to_string()));

        let config = LayerBlockConfig::from(vec![
            ResidualBlockConfig::build(4, 4, 1, false),
            ResidualBlockConfig::build(8, 8, 1, false),
        ]);
        let err = config.try_validate().unwrap_err();
        assert!(err.starts_with("block[0].out_planes(4) != block[1].in_planes(8)"));
    }

    #[test]
    fn test_layer_block_empty_meta() {
        let config = LayerBlockConfig::build(0, 64, 64, 2, true);
        assert!(config.is_empty());
        assert_eq!(config.in_planes(), 0);
        assert_eq!(config.out_planes(), 0);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.output_resolution([75, 38]), [75, 38]);
        assert_eq!(config.try_validate(), Err("blocks is empty".to_string()));
    }

    #[test]
    #[should_panic(expected = "blocks is empty")]
    fn test_layer_block_expect_valid() {
        LayerBlockConfig::new(vec![]).expect_valid();
    }

    #[test]
    fn test_layer_block_map_blocks() {
        let config = LayerBlockConfig::build(2, 4, 4, 2, true)
            .map_blocks(&mut |_, block| block.with_activation(Default::default()));
        assert_eq!(config.len(), 2);
        assert_eq!(config.stride(), 2);
    }

    #[test]
    fn test_layer_block_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: LayerBlock<B> = LayerBlockConfig::build(2, 4, 2, 2, true).init(&device);
        assert_eq!(block.len(), 2);
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 8);
        assert_eq!(block.stride(), 2);

        let output = block.forward(Tensor::ones([2, 4, 9, 5], &device));
        assert_eq!(output.dims(), [2, 8, 5, 3]);
    }
}
