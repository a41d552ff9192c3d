//! Volume tensors and spatial triples

use crate::error::{Error, Result};
use ndarray::{concatenate, Array5, ArrayBase, Axis, Data, Ix5};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A 5-axis volume laid out as (batch, channel, depth, height, width)
pub type Volume = Array5<f32>;

/// Depth/height/width triple used for extents, kernels, strides and padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dims3 {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl Dims3 {
    /// Create a new triple
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self { depth, height, width }
    }

    /// Same value along every axis
    pub const fn cubic(n: usize) -> Self {
        Self::new(n, n, n)
    }

    /// Number of voxels covered by the triple
    pub fn volume(&self) -> usize {
        self.depth * self.height * self.width
    }

    pub fn to_array(self) -> [usize; 3] {
        [self.depth, self.height, self.width]
    }

    /// True when every axis of `self` is strictly smaller than `other`
    pub fn strictly_smaller_than(&self, other: &Dims3) -> bool {
        self.depth < other.depth && self.height < other.height && self.width < other.width
    }
}

impl From<usize> for Dims3 {
    fn from(n: usize) -> Self {
        Dims3::cubic(n)
    }
}

impl From<(usize, usize, usize)> for Dims3 {
    fn from((depth, height, width): (usize, usize, usize)) -> Self {
        Dims3::new(depth, height, width)
    }
}

impl From<[usize; 3]> for Dims3 {
    fn from(dims: [usize; 3]) -> Self {
        Dims3::new(dims[0], dims[1], dims[2])
    }
}

impl std::fmt::Display for Dims3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.depth, self.height, self.width)
    }
}

/// Axis accessors for 5-axis volumes
pub trait VolumeExt {
    fn batch(&self) -> usize;
    fn channels(&self) -> usize;
    fn spatial(&self) -> Dims3;
}

impl<S: Data<Elem = f32>> VolumeExt for ArrayBase<S, Ix5> {
    fn batch(&self) -> usize {
        self.len_of(Axis(0))
    }

    fn channels(&self) -> usize {
        self.len_of(Axis(1))
    }

    fn spatial(&self) -> Dims3 {
        let s = self.shape();
        Dims3::new(s[2], s[3], s[4])
    }
}

/// Concatenate two volumes along the channel axis
///
/// Batch and spatial extents must match exactly; the channel counts are summed.
pub fn concat_channels(a: &Volume, b: &Volume) -> Result<Volume> {
    if a.batch() != b.batch() || a.spatial() != b.spatial() {
        return Err(Error::shape_mismatch(
            "channel concatenation",
            (b.batch(), b.spatial()),
            (a.batch(), a.spatial()),
        ));
    }
    Ok(concatenate(Axis(1), &[a.view(), b.view()])?)
}

/// Sample a volume with i.i.d. Gaussian entries
pub fn gaussian_volume<R: Rng + ?Sized>(
    shape: (usize, usize, usize, usize, usize),
    mean: f32,
    std: f32,
    rng: &mut R,
) -> Result<Volume> {
    if !std.is_finite() || std < 0.0 {
        return Err(Error::InvalidConfig(format!(
            "standard deviation must be finite and non-negative, got {}",
            std
        )));
    }
    let normal = Normal::new(mean, std)
        .map_err(|e| Error::InvalidConfig(format!("Invalid normal distribution: {}", e)))?;
    Ok(Array5::from_shape_simple_fn(shape, || normal.sample(&mut *rng)))
}

/// Unbiased sample standard deviation over every element
pub fn sample_std<S: Data<Elem = f32>>(volume: &ArrayBase<S, Ix5>) -> f32 {
    let n = volume.len();
    if n < 2 {
        return 0.0;
    }
    let mean = volume.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = volume
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1) as f64;
    var.sqrt() as f32
}
