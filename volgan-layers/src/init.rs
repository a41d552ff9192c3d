//! Parameter initialization
//!
//! Layers draw their construction-time parameters with [`uniform_fan_in`].
//! [`weights_init_normal`] is the hook a training harness applies once to a
//! fully built network before the first update.

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use volgan_core::{Error, Module, ParamKind, Result};

/// Standard deviation shared by every distribution of the normal initializer
pub const INIT_STD: f32 = 0.02;

/// Sample `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`
pub fn uniform_fan_in<Sh, D, R>(shape: Sh, fan_in: usize, rng: &mut R) -> Result<Array<f32, D>>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    if fan_in == 0 {
        return Err(Error::InvalidConfig("fan_in must be positive".to_string()));
    }
    let bound = 1.0 / (fan_in as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    Ok(Array::from_shape_simple_fn(shape, || dist.sample(&mut *rng)))
}

/// Re-initialize a module in place
///
/// Convolution kernels (plain and transposed) are drawn from N(0, 0.02²),
/// normalization scales from N(1, 0.02²) and normalization shifts are zeroed.
/// Convolution biases and dense layers keep their construction-time values.
/// Returns the number of tensors rewritten.
pub fn weights_init_normal<M, R>(module: &mut M, rng: &mut R) -> Result<usize>
where
    M: Module + ?Sized,
    R: Rng + ?Sized,
{
    let conv = Normal::new(0.0f32, INIT_STD)
        .map_err(|e| Error::InvalidConfig(format!("Invalid conv init distribution: {}", e)))?;
    let norm = Normal::new(1.0f32, INIT_STD)
        .map_err(|e| Error::InvalidConfig(format!("Invalid norm init distribution: {}", e)))?;

    let mut rewritten = 0;
    module.visit_parameters_mut(&mut |kind, mut tensor| match kind {
        ParamKind::ConvWeight => {
            tensor.map_inplace(|w| *w = conv.sample(&mut *rng));
            rewritten += 1;
        }
        ParamKind::NormWeight => {
            tensor.map_inplace(|w| *w = norm.sample(&mut *rng));
            rewritten += 1;
        }
        ParamKind::NormBias => {
            tensor.fill(0.0);
            rewritten += 1;
        }
        ParamKind::ConvBias | ParamKind::LinearWeight | ParamKind::LinearBias => {}
    });

    tracing::debug!(tensors = rewritten, "applied normal weight initialization");
    Ok(rewritten)
}
