//! 3D convolution and transposed convolution
//!
//! Both kernels lower to a single matrix product per batch element:
//! convolution gathers input patches into a column matrix first (im2col),
//! transposed convolution multiplies first and scatter-adds the columns back
//! into the output volume (col2im).

use crate::init::uniform_fan_in;
use itertools::iproduct;
use ndarray::{Array1, Array2, Array5, ArrayView4, ArrayViewMut1, ArrayViewMut4, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use volgan_core::parallel::{execute_parallel, should_parallelize};
use volgan_core::{Dims3, Error, Layer, Module, ParamKind, Result, Volume, VolumeExt};

/// Output length of a convolution along one axis
fn conv_axis(n: usize, k: usize, s: usize, p: usize) -> Option<usize> {
    if s == 0 || k == 0 || n + 2 * p < k {
        return None;
    }
    Some((n + 2 * p - k) / s + 1)
}

/// Output length of a transposed convolution along one axis
fn conv_transpose_axis(n: usize, k: usize, s: usize, p: usize) -> Option<usize> {
    if s == 0 || k == 0 || n == 0 {
        return None;
    }
    ((n - 1) * s + k).checked_sub(2 * p).filter(|&len| len > 0)
}

/// Spatial extent produced by a convolution
pub fn conv_output_extent(input: Dims3, kernel: Dims3, stride: Dims3, padding: Dims3) -> Result<Dims3> {
    match (
        conv_axis(input.depth, kernel.depth, stride.depth, padding.depth),
        conv_axis(input.height, kernel.height, stride.height, padding.height),
        conv_axis(input.width, kernel.width, stride.width, padding.width),
    ) {
        (Some(d), Some(h), Some(w)) => Ok(Dims3::new(d, h, w)),
        _ => Err(Error::ShapeMismatch(format!(
            "conv3d: input extent {} too small for kernel {} (stride {}, padding {})",
            input, kernel, stride, padding
        ))),
    }
}

/// Spatial extent produced by a transposed convolution
pub fn conv_transpose_output_extent(
    input: Dims3,
    kernel: Dims3,
    stride: Dims3,
    padding: Dims3,
) -> Result<Dims3> {
    match (
        conv_transpose_axis(input.depth, kernel.depth, stride.depth, padding.depth),
        conv_transpose_axis(input.height, kernel.height, stride.height, padding.height),
        conv_transpose_axis(input.width, kernel.width, stride.width, padding.width),
    ) {
        (Some(d), Some(h), Some(w)) => Ok(Dims3::new(d, h, w)),
        _ => Err(Error::ShapeMismatch(format!(
            "conv_transpose3d: input extent {} yields an empty output for kernel {} (stride {}, padding {})",
            input, kernel, stride, padding
        ))),
    }
}

/// For each kernel offset, where every position lands along one axis
///
/// `table[k][pos]` is `pos * stride + k - padding` when that index lies in
/// `0..bound`.
fn tap_table(count: usize, bound: usize, kernel: usize, stride: usize, padding: usize) -> Vec<Vec<Option<usize>>> {
    (0..kernel)
        .map(|k| {
            (0..count)
                .map(|pos| {
                    (pos * stride + k)
                        .checked_sub(padding)
                        .filter(|&idx| idx < bound)
                })
                .collect()
        })
        .collect()
}

struct Taps {
    depth: Vec<Vec<Option<usize>>>,
    height: Vec<Vec<Option<usize>>>,
    width: Vec<Vec<Option<usize>>>,
    kernel: Dims3,
}

impl Taps {
    fn new(count: Dims3, bound: Dims3, kernel: Dims3, stride: Dims3, padding: Dims3) -> Self {
        Self {
            depth: tap_table(count.depth, bound.depth, kernel.depth, stride.depth, padding.depth),
            height: tap_table(count.height, bound.height, kernel.height, stride.height, padding.height),
            width: tap_table(count.width, bound.width, kernel.width, stride.width, padding.width),
            kernel,
        }
    }

    /// Split a flat (channel, kd, kh, kw) row index
    fn split(&self, row: usize) -> (usize, usize, usize, usize) {
        let kvol = self.kernel.volume();
        let rem = row % kvol;
        (
            row / kvol,
            rem / (self.kernel.height * self.kernel.width),
            (rem / self.kernel.width) % self.kernel.height,
            rem % self.kernel.width,
        )
    }
}

fn im2col(x: ArrayView4<'_, f32>, taps: &Taps, out: Dims3) -> Array2<f32> {
    let rows = x.len_of(Axis(0)) * taps.kernel.volume();
    let mut cols = Array2::<f32>::zeros((rows, out.volume()));

    let fill = |(r, mut row): (usize, ArrayViewMut1<'_, f32>)| {
        let (c, a, b, e) = taps.split(r);
        let src = x.index_axis(Axis(0), c);
        for (slot, (d, h, w)) in row.iter_mut().zip(iproduct!(
            taps.depth[a].iter(),
            taps.height[b].iter(),
            taps.width[e].iter()
        )) {
            if let (Some(d), Some(h), Some(w)) = (d, h, w) {
                *slot = src[[*d, *h, *w]];
            }
        }
    };

    if should_parallelize(rows) {
        execute_parallel(|| cols.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(&fill));
    } else {
        cols.axis_iter_mut(Axis(0)).enumerate().for_each(&fill);
    }
    cols
}

fn col2im(cols: &Array2<f32>, taps: &Taps, mut out: ArrayViewMut4<'_, f32>) {
    let kvol = taps.kernel.volume();
    let channels = out.len_of(Axis(0));

    let scatter = |(c, mut dst): (usize, ndarray::ArrayViewMut3<'_, f32>)| {
        for kidx in 0..kvol {
            let (_, a, b, e) = taps.split(kidx);
            let row = cols.row(c * kvol + kidx);
            for (&v, (d, h, w)) in row.iter().zip(iproduct!(
                taps.depth[a].iter(),
                taps.height[b].iter(),
                taps.width[e].iter()
            )) {
                if let (Some(d), Some(h), Some(w)) = (d, h, w) {
                    dst[[*d, *h, *w]] += v;
                }
            }
        }
    };

    if should_parallelize(channels) {
        execute_parallel(|| out.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(&scatter));
    } else {
        out.axis_iter_mut(Axis(0)).enumerate().for_each(&scatter);
    }
}

/// Functional 3D convolution (cross-correlation with zero padding)
///
/// `weight` is laid out `(out, in, kd, kh, kw)`.
pub fn conv3d(
    input: &Volume,
    weight: &Array5<f32>,
    bias: Option<&Array1<f32>>,
    stride: Dims3,
    padding: Dims3,
) -> Result<Volume> {
    let w = weight.shape();
    let (c_out, c_in) = (w[0], w[1]);
    let kernel = Dims3::new(w[2], w[3], w[4]);
    if input.channels() != c_in {
        return Err(Error::shape_mismatch("conv3d input channels", c_in, input.channels()));
    }
    if let Some(b) = bias {
        if b.len() != c_out {
            return Err(Error::shape_mismatch("conv3d bias length", c_out, b.len()));
        }
    }

    let in_extent = input.spatial();
    let out_extent = conv_output_extent(in_extent, kernel, stride, padding)?;
    let taps = Taps::new(out_extent, in_extent, kernel, stride, padding);
    let w_mat = weight.to_shape((c_out, c_in * kernel.volume()))?;

    let mut output = Volume::zeros((
        input.batch(),
        c_out,
        out_extent.depth,
        out_extent.height,
        out_extent.width,
    ));
    for (x, mut y) in input.outer_iter().zip(output.outer_iter_mut()) {
        let cols = im2col(x, &taps, out_extent);
        let mut mat = w_mat.dot(&cols);
        if let Some(b) = bias {
            mat += &b.view().insert_axis(Axis(1));
        }
        y.assign(&mat.to_shape((c_out, out_extent.depth, out_extent.height, out_extent.width))?);
    }
    Ok(output)
}

/// Functional 3D transposed convolution
///
/// `weight` is laid out `(in, out, kd, kh, kw)`.
pub fn conv_transpose3d(
    input: &Volume,
    weight: &Array5<f32>,
    bias: Option<&Array1<f32>>,
    stride: Dims3,
    padding: Dims3,
) -> Result<Volume> {
    let w = weight.shape();
    let (c_in, c_out) = (w[0], w[1]);
    let kernel = Dims3::new(w[2], w[3], w[4]);
    if input.channels() != c_in {
        return Err(Error::shape_mismatch("conv_transpose3d input channels", c_in, input.channels()));
    }
    if let Some(b) = bias {
        if b.len() != c_out {
            return Err(Error::shape_mismatch("conv_transpose3d bias length", c_out, b.len()));
        }
    }

    let in_extent = input.spatial();
    let out_extent = conv_transpose_output_extent(in_extent, kernel, stride, padding)?;
    let taps = Taps::new(in_extent, out_extent, kernel, stride, padding);
    let w_mat = weight.to_shape((c_in, c_out * kernel.volume()))?;

    let mut output = Volume::zeros((
        input.batch(),
        c_out,
        out_extent.depth,
        out_extent.height,
        out_extent.width,
    ));
    for (x, mut y) in input.outer_iter().zip(output.outer_iter_mut()) {
        let x_mat = x.to_shape((c_in, in_extent.volume()))?;
        let cols = w_mat.t().dot(&x_mat);
        col2im(&cols, &taps, y.view_mut());
        if let Some(b) = bias {
            for (mut channel, &bv) in y.outer_iter_mut().zip(b.iter()) {
                channel += bv;
            }
        }
    }
    Ok(output)
}

/// Construction parameters shared by [`Conv3d`] and [`ConvTranspose3d`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: Dims3,
    pub stride: Dims3,
    pub padding: Dims3,
    pub bias: bool,
}

impl ConvConfig {
    /// 3×3×3, stride 1, padding 1, with bias
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: Dims3::cubic(3),
            stride: Dims3::cubic(1),
            padding: Dims3::cubic(1),
            bias: true,
        }
    }

    pub fn kernel(mut self, kernel: Dims3) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn stride(mut self, stride: Dims3) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: Dims3) -> Self {
        self.padding = padding;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    fn validate(&self, op: &str) -> Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: channel counts must be positive ({} -> {})",
                op, self.in_channels, self.out_channels
            )));
        }
        if self.kernel.volume() == 0 || self.stride.volume() == 0 {
            return Err(Error::InvalidConfig(format!(
                "{}: kernel {} and stride {} must be positive",
                op, self.kernel, self.stride
            )));
        }
        Ok(())
    }
}

/// Learnable 3D convolution
#[derive(Debug, Clone)]
pub struct Conv3d {
    config: ConvConfig,
    weight: Array5<f32>,
    bias: Option<Array1<f32>>,
}

impl Conv3d {
    pub fn new<R: Rng + ?Sized>(config: ConvConfig, rng: &mut R) -> Result<Self> {
        config.validate("conv3d")?;
        let k = config.kernel;
        let fan_in = config.in_channels * k.volume();
        let weight = uniform_fan_in(
            (config.out_channels, config.in_channels, k.depth, k.height, k.width),
            fan_in,
            rng,
        )?;
        let bias = if config.bias {
            Some(uniform_fan_in(config.out_channels, fan_in, rng)?)
        } else {
            None
        };
        Ok(Self { config, weight, bias })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn weight(&self) -> &Array5<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }
}

impl Module for Conv3d {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        visitor(ParamKind::ConvWeight, self.weight.view_mut().into_dyn());
        if let Some(bias) = self.bias.as_mut() {
            visitor(ParamKind::ConvBias, bias.view_mut().into_dyn());
        }
    }

    fn set_training(&mut self, _training: bool) {}
}

impl Layer for Conv3d {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        conv3d(input, &self.weight, self.bias.as_ref(), self.config.stride, self.config.padding)
    }
}

/// Learnable 3D transposed convolution
#[derive(Debug, Clone)]
pub struct ConvTranspose3d {
    config: ConvConfig,
    weight: Array5<f32>,
    bias: Option<Array1<f32>>,
}

impl ConvTranspose3d {
    pub fn new<R: Rng + ?Sized>(config: ConvConfig, rng: &mut R) -> Result<Self> {
        config.validate("conv_transpose3d")?;
        let k = config.kernel;
        // Fan-in follows dimension 1 of the transposed weight (output channels).
        let fan_in = config.out_channels * k.volume();
        let weight = uniform_fan_in(
            (config.in_channels, config.out_channels, k.depth, k.height, k.width),
            fan_in,
            rng,
        )?;
        let bias = if config.bias {
            Some(uniform_fan_in(config.out_channels, fan_in, rng)?)
        } else {
            None
        };
        Ok(Self { config, weight, bias })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn weight(&self) -> &Array5<f32> {
        &self.weight
    }
}

impl Module for ConvTranspose3d {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        visitor(ParamKind::ConvWeight, self.weight.view_mut().into_dyn());
        if let Some(bias) = self.bias.as_mut() {
            visitor(ParamKind::ConvBias, bias.view_mut().into_dyn());
        }
    }

    fn set_training(&mut self, _training: bool) {}
}

impl Layer for ConvTranspose3d {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        conv_transpose3d(input, &self.weight, self.bias.as_ref(), self.config.stride, self.config.padding)
    }
}
