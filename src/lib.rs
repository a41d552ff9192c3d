//! # volgan
//!
//! Volumetric image-to-image translation networks (3D Pix2Pix) for Rust.
//!
//! This is the umbrella crate that provides convenient access to all volgan
//! functionality. You can use it to get everything in one place, or depend on
//! the individual crates for more granular control.
//!
//! ## Features
//!
//! - **Core**: Volume tensors, spatial triples, module traits and parallel execution
//! - **Layers**: Convolution, transposed convolution, instance norm, dense layers,
//!   dropout, noise injection, trilinear resampling and weight initialization
//! - **Models**: Basic and wide U-Net generators, the dense generator and the
//!   PatchGAN discriminator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use volgan::prelude::*;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut generator = GeneratorUNet::new(GeneratorConfig::default(), &mut rng)?;
//! weights_init_normal(&mut generator, &mut rng)?;
//! generator.eval();
//!
//! let input = Volume::zeros((1, 1, 52, 49, 49));
//! let output = generator.forward(&input)?;
//! assert_eq!(output.shape(), &[1, 1, 20, 17, 17]);
//! # Ok::<(), volgan::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables models
//! - `models`: Network definitions built on the layers

// Re-export core functionality
pub use volgan_core::*;

// Re-export sub-crates
pub use volgan_layers as layers;

#[cfg(feature = "models")]
pub use volgan_models as models;

/// Convenient imports for common use cases
pub mod prelude {
    pub use volgan_core::*;
    pub use volgan_layers::*;

    #[cfg(feature = "models")]
    pub use volgan_models::*;
}
