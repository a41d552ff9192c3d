//! # volgan layers
//!
//! Forward kernels and learnable layers for volumetric networks.
//!
//! Every kernel works on 5-axis `(batch, channel, depth, height, width)`
//! volumes and fails with a shape error instead of padding or truncating.

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod init;
pub mod interpolate;
pub mod linear;
pub mod noise;
pub mod norm;

// Re-export commonly used items
pub use activation::*;
pub use conv::*;
pub use dropout::*;
pub use init::*;
pub use interpolate::*;
pub use linear::*;
pub use noise::*;
pub use norm::*;
