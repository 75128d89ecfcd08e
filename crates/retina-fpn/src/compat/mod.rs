//! # Compat
//!
//! Thin wrappers over ``burn`` layer families, and shape arithmetic
//! ``burn`` does not expose.

pub mod activation_wrapper;
pub mod conv_shape;
pub mod normalization_wrapper;
