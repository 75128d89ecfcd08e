//! # Model Families
pub mod resnet;
pub mod retina_fpn;
