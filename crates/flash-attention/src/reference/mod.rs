//! Portable, exact implementation of scaled dot-product attention.
//!
//! This path favours clarity over absolute performance and serves as the
//! baseline for validating the fused kernel.

pub mod exact;

pub use exact::SdpaAttention;
