//! Instance normalization

use ndarray::{Array1, Axis};
use rayon::prelude::*;
use volgan_core::parallel::{execute_parallel, should_parallelize};
use volgan_core::{Error, Layer, Module, ParamKind, Result, Volume, VolumeExt};

/// Numerical floor added to the variance
pub const NORM_EPS: f32 = 1e-5;

/// Normalize every (sample, channel) slab over its spatial extent
///
/// Uses the biased variance; no statistics are shared across the batch.
pub fn instance_norm3d(input: &Volume, eps: f32) -> Result<Volume> {
    let (b, c) = (input.batch(), input.channels());
    let voxels = input.spatial().volume();
    if voxels == 0 {
        return Err(Error::ShapeMismatch("instance_norm3d: empty spatial extent".to_string()));
    }

    let mut output = input.as_standard_layout().into_owned();
    {
        let mut slabs = output.view_mut().into_shape_with_order((b * c, voxels))?;
        let normalize = |mut slab: ndarray::ArrayViewMut1<'_, f32>| {
            let n = voxels as f64;
            let mean = slab.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = slab.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
            let inv_std = 1.0 / (var + eps as f64).sqrt();
            slab.mapv_inplace(|v| ((v as f64 - mean) * inv_std) as f32);
        };
        if should_parallelize(b * c) {
            execute_parallel(|| slabs.axis_iter_mut(Axis(0)).into_par_iter().for_each(&normalize));
        } else {
            slabs.axis_iter_mut(Axis(0)).for_each(&normalize);
        }
    }
    Ok(output)
}

/// Instance normalization layer with an optional per-channel affine transform
#[derive(Debug, Clone)]
pub struct InstanceNorm3d {
    num_features: usize,
    eps: f32,
    affine: Option<(Array1<f32>, Array1<f32>)>,
}

impl InstanceNorm3d {
    /// Plain normalization without learnable parameters
    ///
    /// Without an affine transform the channel count is not enforced.
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: NORM_EPS,
            affine: None,
        }
    }

    /// Normalization followed by a learnable scale (starting at 1) and shift (starting at 0)
    pub fn with_affine(num_features: usize) -> Self {
        Self {
            num_features,
            eps: NORM_EPS,
            affine: Some((Array1::ones(num_features), Array1::zeros(num_features))),
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn is_affine(&self) -> bool {
        self.affine.is_some()
    }

    pub fn affine(&self) -> Option<(&Array1<f32>, &Array1<f32>)> {
        self.affine.as_ref().map(|(w, b)| (w, b))
    }
}

impl Module for InstanceNorm3d {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        if let Some((weight, bias)) = self.affine.as_mut() {
            visitor(ParamKind::NormWeight, weight.view_mut().into_dyn());
            visitor(ParamKind::NormBias, bias.view_mut().into_dyn());
        }
    }

    fn set_training(&mut self, _training: bool) {}
}

impl Layer for InstanceNorm3d {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        let mut output = instance_norm3d(input, self.eps)?;
        if let Some((weight, bias)) = &self.affine {
            if input.channels() != self.num_features {
                return Err(Error::shape_mismatch(
                    "instance_norm3d channels",
                    self.num_features,
                    input.channels(),
                ));
            }
            for mut sample in output.outer_iter_mut() {
                for ((mut channel, &w), &b) in sample.outer_iter_mut().zip(weight.iter()).zip(bias.iter()) {
                    channel.mapv_inplace(|v| v * w + b);
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array5;

    fn ramp() -> Volume {
        Array5::from_shape_fn((2, 3, 3, 4, 5), |(n, c, d, h, w)| {
            (n * 7 + c * 3) as f32 + (d * 20 + h * 5 + w) as f32 * (c + 1) as f32
        })
    }

    #[test]
    fn test_instance_norm_statistics() {
        let out = instance_norm3d(&ramp(), NORM_EPS).unwrap();
        for sample in out.outer_iter() {
            for channel in sample.outer_iter() {
                let n = channel.len() as f32;
                let mean = channel.sum() / n;
                let var = channel.mapv(|v| (v - mean).powi(2)).sum() / n;
                assert_relative_eq!(mean, 0.0, epsilon = 1e-4);
                assert_relative_eq!(var, 1.0, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_instance_norm_is_per_sample() {
        let input = ramp();
        let full = instance_norm3d(&input, NORM_EPS).unwrap();
        let single = input.slice(ndarray::s![1..2, .., .., .., ..]).to_owned();
        let alone = instance_norm3d(&single, NORM_EPS).unwrap();
        assert_eq!(full.slice(ndarray::s![1..2, .., .., .., ..]), alone);
    }

    #[test]
    fn test_constant_slab_maps_to_zero() {
        let out = instance_norm3d(&Volume::from_elem((1, 1, 2, 2, 2), 3.0), NORM_EPS).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_affine_layer() {
        let mut norm = InstanceNorm3d::with_affine(3);
        assert_eq!(norm.num_parameters(), 6);
        norm.visit_parameters_mut(&mut |kind, mut t| {
            if kind == ParamKind::NormBias {
                t.fill(2.0);
            }
        });
        let out = norm.forward(&ramp()).unwrap();
        let mean = out.slice(ndarray::s![0, 1, .., .., ..]).mean().unwrap();
        assert_relative_eq!(mean, 2.0, epsilon = 1e-4);
        assert!(norm.forward(&Volume::ones((1, 2, 2, 2, 2))).is_err());
    }

    #[test]
    fn test_plain_layer_has_no_parameters() {
        let mut norm = InstanceNorm3d::new(16);
        assert_eq!(norm.num_parameters(), 0);
        // Channel count is not enforced without an affine transform.
        assert!(norm.forward(&Volume::ones((1, 1, 2, 2, 2))).is_ok());
    }
}
