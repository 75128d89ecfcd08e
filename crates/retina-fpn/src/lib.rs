#![warn(missing_docs)]
//!# retina-fpn - `ResNet` Feature Pyramid Networks for Burn
//!
//! ## Notable Components
//!
//! * [`compat`] - compat code, shims over ``burn`` layer families.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//!   * [`compat::conv_shape`] - convolution output shape arithmetic.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::cna`] - ``Conv2d + Norm + Activation`` block.
//!     * [`layers::blocks::conv_norm`] - ``Conv2d + Norm`` block.
//!     * [`layers::blocks::upsample_add`] - upsample / crop / add feature fusion.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - `ResNet` backbone components.
//!   * [`models::retina_fpn`] - The `RetinaNet` Feature Pyramid Network.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod layers;
pub mod models;
