//! Trilinear resampling of volumes to a fixed spatial extent
//!
//! Source coordinates follow the half-pixel convention used when corners are
//! not aligned: `src = (dst + 0.5) * in / out - 0.5`, clamped at zero.

use ndarray::{Axis, Zip};
use rayon::prelude::*;
use volgan_core::parallel::{execute_parallel, should_parallelize};
use volgan_core::{Dims3, Error, Result, Volume, VolumeExt};

/// Interpolation weights along one axis: (lower index, upper index, upper weight)
fn linear_weights(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(in_len - 1);
            let i1 = if i0 < in_len - 1 { i0 + 1 } else { i0 };
            (i0, i1, src - i0 as f32)
        })
        .collect()
}

fn resample_axis(input: &Volume, axis: usize, out_len: usize) -> Volume {
    let in_len = input.len_of(Axis(axis));
    let weights = linear_weights(in_len, out_len);

    let mut shape = input.raw_dim();
    shape[axis] = out_len;
    let mut output = Volume::zeros(shape);

    let blend = |(o, mut slab): (usize, ndarray::ArrayViewMut4<'_, f32>)| {
        let (i0, i1, t) = weights[o];
        Zip::from(&mut slab)
            .and(input.index_axis(Axis(axis), i0))
            .and(input.index_axis(Axis(axis), i1))
            .for_each(|y, &a, &b| *y = a * (1.0 - t) + b * t);
    };

    if should_parallelize(out_len) {
        execute_parallel(|| output.axis_iter_mut(Axis(axis)).into_par_iter().enumerate().for_each(&blend));
    } else {
        output.axis_iter_mut(Axis(axis)).enumerate().for_each(&blend);
    }
    output
}

/// Resample the spatial axes of `input` to `size`
pub fn trilinear(input: &Volume, size: Dims3) -> Result<Volume> {
    let extent = input.spatial();
    if extent.volume() == 0 || size.volume() == 0 {
        return Err(Error::ShapeMismatch(format!(
            "trilinear: cannot resample extent {} to {}",
            extent, size
        )));
    }

    let mut output = input.to_owned();
    for (axis, (from, to)) in extent.to_array().into_iter().zip(size.to_array()).enumerate() {
        if from != to {
            output = resample_axis(&output, axis + 2, to);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array5;

    #[test]
    fn test_same_size_is_identity() {
        let input = Array5::from_shape_fn((1, 2, 3, 4, 5), |(_, c, d, h, w)| (c + d * h + w) as f32);
        assert_eq!(trilinear(&input, input.spatial()).unwrap(), input);
    }

    #[test]
    fn test_upsample_weights() {
        // in=2, out=4: src = -0.25, 0.25, 0.75, 1.25
        let w = linear_weights(2, 4);
        assert_eq!((w[0].0, w[0].1), (0, 1));
        assert_relative_eq!(w[0].2, 0.0);
        assert_relative_eq!(w[1].2, 0.25);
        assert_relative_eq!(w[2].2, 0.75);
        assert_eq!((w[3].0, w[3].1), (1, 1));
    }

    #[test]
    fn test_linear_ramp_is_preserved_inside() {
        let input = Array5::from_shape_fn((1, 1, 1, 1, 8), |(_, _, _, _, w)| w as f32);
        let out = trilinear(&input, Dims3::new(1, 1, 4)).unwrap();
        // Downsampling by 2 averages neighbouring pairs.
        let expected = [0.5, 2.5, 4.5, 6.5];
        for (got, want) in out.iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_constant_volume_stays_constant() {
        let input = Volume::from_elem((2, 3, 52, 48, 48), 0.25);
        let out = trilinear(&input, Dims3::new(20, 17, 17)).unwrap();
        assert_eq!(out.shape(), &[2, 3, 20, 17, 17]);
        assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_rejects_empty_target() {
        let input = Volume::ones((1, 1, 2, 2, 2));
        assert!(trilinear(&input, Dims3::new(0, 2, 2)).is_err());
    }
}
