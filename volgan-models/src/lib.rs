//! Volumetric Pix2Pix networks
//!
//! Two 3D U-Net generators (basic and wide), a dense generator over rows of
//! voxels and a conditional PatchGAN discriminator, all built from the layers
//! in `volgan-layers`.

pub mod blocks;
pub mod config;
pub mod discriminator;
pub mod factory;
pub mod fully_connected;
pub mod generator;
pub mod unet;
pub mod wide_generator;

pub use blocks::*;
pub use config::*;
pub use discriminator::*;
pub use factory::*;
pub use fully_connected::*;
pub use generator::*;
pub use unet::*;
pub use wide_generator::*;
