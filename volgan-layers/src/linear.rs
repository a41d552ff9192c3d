//! Dense transform over the last axis of a volume

use crate::init::uniform_fan_in;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use volgan_core::{Error, Layer, Module, ParamKind, Result, Volume};

/// `y = x Wᵀ + b` applied to every row along the last axis
///
/// `weight` is laid out `(out_features, in_features)`.
pub fn linear(input: &Volume, weight: &Array2<f32>, bias: Option<&Array1<f32>>) -> Result<Volume> {
    let (out_features, in_features) = weight.dim();
    if in_features == 0 {
        return Err(Error::InvalidConfig("linear: weight has no input features".to_string()));
    }
    let shape = input.shape();
    if shape[4] != in_features {
        return Err(Error::shape_mismatch("linear input features", in_features, shape[4]));
    }
    let rows = input.len() / in_features;
    let x = input.to_shape((rows, in_features))?;
    let mut y = x.dot(&weight.t());
    if let Some(b) = bias {
        y += &b.view().insert_axis(Axis(0));
    }
    Ok(y.into_shape_with_order((shape[0], shape[1], shape[2], shape[3], out_features))?)
}

/// Learnable dense layer
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, bias: bool, rng: &mut R) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear: feature counts must be positive ({} -> {})",
                in_features, out_features
            )));
        }
        let weight = uniform_fan_in((out_features, in_features), in_features, rng)?;
        let bias = if bias {
            Some(uniform_fan_in(out_features, in_features, rng)?)
        } else {
            None
        };
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }
}

impl Module for Linear {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        visitor(ParamKind::LinearWeight, self.weight.view_mut().into_dyn());
        if let Some(bias) = self.bias.as_mut() {
            visitor(ParamKind::LinearBias, bias.view_mut().into_dyn());
        }
    }

    fn set_training(&mut self, _training: bool) {}
}

impl Layer for Linear {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        linear(input, &self.weight, self.bias.as_ref())
    }
}
