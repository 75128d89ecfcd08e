//! # `ResNet` Backbone
//!
//! The residual blocks, stages, and stem of a `ResNet`;
//! without the classification head.
//!
//! [`backbone::ResNetBackbone`] maps an image to the ``c2..c5`` stage features.

pub mod backbone;
pub mod basic_block;
pub mod bottleneck;
pub mod downsample;
pub mod layer_block;
pub mod residual_block;
pub mod stem;
pub mod util;
