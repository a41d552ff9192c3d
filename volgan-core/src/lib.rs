//! Core data structures and traits for volgan
//!
//! This crate provides the fundamental types shared by every network in the
//! workspace: the 5-axis volume tensor, spatial triples, the module/layer
//! traits and the parallel execution helpers used by the tensor kernels.

pub mod volume;
pub mod traits;
pub mod parallel;
pub mod error;

pub use volume::*;
pub use traits::*;
pub use error::*;

/// Re-export the ndarray types used throughout the public API
pub use ndarray::{Array1, Array2, Array5, ArrayViewMutD, Axis};
