//! # Feature Pyramid Output

use burn::prelude::{Backend, Tensor};

/// Level names, finest first.
pub const PYRAMID_LEVEL_NAMES: [&str; 5] = ["p3", "p4", "p5", "p6", "p7"];

/// Level strides relative to the input, finest first.
pub const PYRAMID_STRIDES: [usize; 5] = [8, 16, 32, 64, 128];

/// ``(p3, p4, p5, p6, p7)``
pub type PyramidTuple<B> = (
    Tensor<B, 4>,
    Tensor<B, 4>,
    Tensor<B, 4>,
    Tensor<B, 4>,
    Tensor<B, 4>,
);

/// The five feature maps of a [`super::model::RetinaFpn`].
///
/// Every level is ``[batch, fpn_planes, ceil(height/stride), ceil(width/stride)]``;
/// with the strides of [`PYRAMID_STRIDES`].
#[derive(Debug, Clone)]
pub struct FeaturePyramid<B: Backend> {
    /// Stride 8.
    pub p3: Tensor<B, 4>,
    /// Stride 16.
    pub p4: Tensor<B, 4>,
    /// Stride 32.
    pub p5: Tensor<B, 4>,
    /// Stride 64.
    pub p6: Tensor<B, 4>,
    /// Stride 128.
    pub p7: Tensor<B, 4>,
}

impl<B: Backend> FeaturePyramid<B> {
    /// Unpack as a ``(p3, p4, p5, p6, p7)`` tuple.
    pub fn into_tuple(self) -> PyramidTuple<B> {
        (self.p3, self.p4, self.p5, self.p6, self.p7)
    }

    /// Unpack as a finest-first array.
    pub fn into_levels(self) -> [Tensor<B, 4>; 5] {
        [self.p3, self.p4, self.p5, self.p6, self.p7]
    }

    /// Borrow the levels, finest first.
    pub fn levels(&self) -> [&Tensor<B, 4>; 5] {
        [&self.p3, &self.p4, &self.p5, &self.p6, &self.p7]
    }

    /// The ``[batch, channels, height, width]`` shape of each level.
    pub fn shapes(&self) -> [[usize; 4]; 5] {
        self.levels().map(|level| level.dims())
    }
}
