//! # `ResNet` Utilities
use burn::nn::Initializer;

/// Kaiming-normal (fan-out) initializer for convs feeding a `ReLU`.
pub const CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: core::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Lift a scalar to a square ``[x, x]`` array.
#[inline(always)]
pub fn scalar_to_array(x: usize) -> [usize; 2] {
    [x, x]
}
