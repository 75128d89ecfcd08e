//! # `RetinaNet` Feature Pyramid Network
//!
//! A [`model::RetinaFpn`] is a [`crate::models::resnet::backbone::ResNetBackbone`]
//! with a top-down / lateral pyramid head; producing the five ``p3..p7``
//! feature maps used by single-stage detectors.
//!
//! ```text
//! x -> stem -> c2 -> c3 -> c4 -> c5 -> conv6 -> p6 -> relu/conv7 -> p7
//!                    |     |     |
//!                    |     |     +-> top -------------------------> p5
//!                    |     +-> lateral4 (+ upsample p5) -> smooth4 -> p4
//!                    +-> lateral3 (+ upsample p4) -> smooth3 -------> p3
//! ```
//!
//! * [`model`] - the network and its configs.
//! * [`prefabs`] - named preset configurations.

pub mod extra_levels;
pub mod model;
pub mod prefabs;
pub mod pyramid;
pub mod top_down;
