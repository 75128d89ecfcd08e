//! # Convolution Shape Utilities
//!
//! Predict the spatial output size of convolution and pooling layers.
//!
//! Unlike stride-divisibility contracts, these accept any input size;
//! which is what the pyramid needs for odd input resolutions.

use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2d;
use burn::prelude::Backend;

/// Predict the output size of a 1D convolution (or pooling) window.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
/// - [pytorch conv2d](https://docs.pytorch.org/docs/stable/generated/torch.nn.Conv2d.html)
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride, must be > 0.
/// - `padding`: The padding, added evenly to both sides of the input.
/// - `dilation`: The dilation, must be > 0.
///
/// # Returns
///
/// The output size; or `None` if the kernel does not fit the padded input.
pub fn conv_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0, "input_size must be > 0");
    assert!(kernel_size > 0, "kernel_size must be > 0");
    assert!(stride > 0, "stride must be > 0");
    assert!(dilation > 0, "dilation must be > 0");

    let padded_size = input_size + 2 * padding;
    let kernel_extent = 1 + dilation * (kernel_size - 1);

    if padded_size < kernel_extent {
        return None;
    }
    Some((padded_size - kernel_extent) / stride + 1)
}

/// Predict the ``[height, width]`` output of a 2D convolution (or pooling) window.
///
/// This is the ``panic``-ing 2D form of [`conv_output_size`].
///
/// # Panics
///
/// If the kernel does not fit the padded input on either axis.
pub fn expect_conv_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: [usize; 2],
    stride: [usize; 2],
    padding: [usize; 2],
    dilation: [usize; 2],
) -> [usize; 2] {
    let mut output = [0; 2];
    for i in 0..2 {
        output[i] = match conv_output_size(
            input_resolution[i],
            kernel_size[i],
            stride[i],
            padding[i],
            dilation[i],
        ) {
            Some(size) => size,
            None => panic!(
                "No legal output size for conv with:\n input_resolution:{input_resolution:?}\n kernel_size:{kernel_size:?}\n stride:{stride:?}\n padding:{padding:?}\n dilation:{dilation:?}",
            ),
        };
    }
    output
}

/// Ceil-divide a resolution by a stride.
///
/// ``[ceil(height / stride), ceil(width / stride)]``
///
/// # Panics
///
/// If `stride` is 0.
pub fn ceil_div_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    assert!(stride > 0, "stride must be > 0");
    input_resolution.map(|size| size.div_ceil(stride))
}

/// Resolve a [`PaddingConfig2d`] into explicit ``[height, width]`` padding.
///
/// `Same` padding resolves to the symmetric padding of a stride-1 window.
pub fn padding_config_values(
    padding: &PaddingConfig2d,
    kernel_size: [usize; 2],
    dilation: [usize; 2],
) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Explicit(height, width) => [*height, *width],
        PaddingConfig2d::Same => [
            dilation[0] * (kernel_size[0] - 1) / 2,
            dilation[1] * (kernel_size[1] - 1) / 2,
        ],
    }
}

/// Predict the ``[height, width]`` output of a [`Conv2d`] layer.
///
/// # Panics
///
/// If the kernel does not fit the padded input.
pub fn conv2d_output_resolution<B: Backend>(
    conv: &Conv2d<B>,
    input_resolution: [usize; 2],
) -> [usize; 2] {
    expect_conv_output_resolution(
        input_resolution,
        conv.kernel_size,
        conv.stride,
        padding_config_values(&conv.padding.0, conv.kernel_size, conv.dilation),
        conv.dilation,
    )
}
