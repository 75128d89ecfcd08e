//! # `UpsampleAdd` - top-down feature fusion.
//!
//! An [`UpsampleAdd`] module fuses a coarse feature map into a finer lateral
//! feature map:
//! * upsample the coarse map by an integer factor,
//! * crop it to the lateral map's ``[height, width]``,
//! * add the lateral map.
//!
//! When a lateral dimension is odd, the coarse map was produced by a
//! ceil-dividing stride; so the upsampled map is one pixel larger than
//! the lateral map, e.g.:
//!
//! ```text
//! lateral: [N, C, 15, 15]
//! coarse:  [N, C,  8,  8]
//! upsampled: [N, C, 16, 16] -> cropped: [N, C, 15, 15]
//! ```

use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode};
use burn::prelude::{Backend, Tensor};

/// Crop a ``[batch, channels, height, width]`` tensor to a target resolution.
///
/// Keeps the top-left ``[..target_height, ..target_width]`` window.
///
/// # Panics
///
/// If the input is smaller than the target on either axis.
pub fn crop_spatial<B: Backend>(
    input: Tensor<B, 4>,
    resolution: [usize; 2],
) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let [target_height, target_width] = resolution;
    assert!(
        height >= target_height && width >= target_width,
        "cannot crop [{height}, {width}] to [{target_height}, {target_width}]"
    );

    if height == target_height && width == target_width {
        return input;
    }
    input.slice([0..batch, 0..channels, 0..target_height, 0..target_width])
}

/// [`UpsampleAdd`] Config.
#[derive(Config, Debug)]
pub struct UpsampleAddConfig {
    /// Integer upsample factor, applied to both axes.
    #[config(default = 2)]
    pub scale_factor: usize,

    /// Interpolation mode.
    #[config(default = "InterpolateMode::Nearest")]
    pub mode: InterpolateMode,
}

impl UpsampleAddConfig {
    /// Initialize an [`UpsampleAdd`].
    ///
    /// # Panics
    ///
    /// If `scale_factor` is 0.
    pub fn init(&self) -> UpsampleAdd {
        assert!(self.scale_factor > 0, "scale_factor must be > 0");
        let factor = self.scale_factor as f32;
        UpsampleAdd {
            scale_factor: self.scale_factor,
            upsample: Interpolate2dConfig::new()
                .with_scale_factor(Some([factor, factor]))
                .with_mode(self.mode.clone())
                .init(),
        }
    }
}

/// Upsample / crop / add fusion layer.
#[derive(Module, Clone, Debug)]
pub struct UpsampleAdd {
    /// Integer upsample factor.
    pub scale_factor: usize,

    /// Interpolation layer.
    pub upsample: Interpolate2d,
}

impl UpsampleAdd {
    /// The resolution of the upsampled (pre-crop) coarse map.
    pub fn upsampled_resolution(
        &self,
        coarse_resolution: [usize; 2],
    ) -> [usize; 2] {
        coarse_resolution.map(|size| size * self.scale_factor)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `coarse`: ``[batch, channels, coarse_height, coarse_width]``;
    ///   where ``coarse_height * scale_factor >= height``, and likewise for width.
    /// - `lateral`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height, width]``
    pub fn forward<B: Backend>(
        &self,
        coarse: Tensor<B, 4>,
        lateral: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = lateral.dims();
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "channels", "coarse_height", "coarse_width"];
        let [coarse_height, coarse_width] = INPUT_CONTRACT.unpack_shape(
            &coarse,
            &["coarse_height", "coarse_width"],
            &[("batch", batch), ("channels", channels)]
        );

        let [up_height, up_width] = self.upsampled_resolution([coarse_height, coarse_width]);
        assert!(
            up_height >= height && up_width >= width,
            "upsampled [{up_height}, {up_width}] is smaller than lateral [{height}, {width}]"
        );

        let x = self.upsample.forward(coarse);
        let x = crop_spatial(x, [height, width]) + lateral;

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "channels", "height", "width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("channels", channels),
                    ("height", height),
                    ("width", width)
                ]
            );
        });

        x
    }
}
