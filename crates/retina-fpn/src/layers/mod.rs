//! Common low-level modules for building feature extractors in Burn.
pub mod blocks;
