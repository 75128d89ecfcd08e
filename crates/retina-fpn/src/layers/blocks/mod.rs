//! # Miscellaneous Blocks
pub mod cna;
pub mod conv_norm;
pub mod upsample_add;
