//! Core traits for volgan

use crate::{error::Result, volume::Volume};
use ndarray::ArrayViewMutD;
use serde::{Deserialize, Serialize};

/// Role of a learnable tensor inside a module
///
/// Initializers dispatch on this tag instead of on concrete layer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    /// Kernel of a convolution or transposed convolution
    ConvWeight,
    ConvBias,
    /// Affine scale of a normalization layer
    NormWeight,
    NormBias,
    LinearWeight,
    LinearBias,
}

/// Trait for anything that owns learnable tensors and a training flag
pub trait Module: Send + Sync {
    /// Visit every learnable tensor mutably
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ArrayViewMutD<'_, f32>));

    /// Number of scalar parameters per kind, summed over the module
    fn parameter_counts(&mut self) -> Vec<(ParamKind, usize)> {
        let mut counts: Vec<(ParamKind, usize)> = Vec::new();
        self.visit_parameters_mut(&mut |kind, tensor| {
            match counts.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, n)) => *n += tensor.len(),
                None => counts.push((kind, tensor.len())),
            }
        });
        counts
    }

    /// Total number of scalar parameters
    fn num_parameters(&mut self) -> usize {
        self.parameter_counts().iter().map(|(_, n)| n).sum()
    }

    /// Switch between training and inference behaviour
    fn set_training(&mut self, training: bool);

    /// Enable stochastic layers (dropout, noise)
    fn train(&mut self) {
        self.set_training(true);
    }

    /// Disable stochastic layers; forward passes become deterministic
    fn eval(&mut self) {
        self.set_training(false);
    }
}

/// A module mapping one volume to another
pub trait Layer: Module {
    fn forward(&self, input: &Volume) -> Result<Volume>;
}

/// A module that transforms its input and joins it with an encoder feature map
pub trait SkipLayer: Module {
    /// Transform `input`, then concatenate the result with `skip` along channels
    fn forward(&self, input: &Volume, skip: &Volume) -> Result<Volume>;
}

impl<M: Module + ?Sized> Module for Box<M> {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ArrayViewMutD<'_, f32>)) {
        (**self).visit_parameters_mut(visitor)
    }

    fn set_training(&mut self, training: bool) {
        (**self).set_training(training)
    }
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        (**self).forward(input)
    }
}

impl<M: Module> Module for Option<M> {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ArrayViewMutD<'_, f32>)) {
        if let Some(module) = self {
            module.visit_parameters_mut(visitor);
        }
    }

    fn set_training(&mut self, training: bool) {
        if let Some(module) = self {
            module.set_training(training);
        }
    }
}

impl<L: Layer> Layer for Option<L> {
    /// An absent layer is the identity
    fn forward(&self, input: &Volume) -> Result<Volume> {
        match self {
            Some(layer) => layer.forward(input),
            None => Ok(input.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    struct Affine {
        weight: Array2<f32>,
        bias: Array1<f32>,
        training: bool,
    }

    impl Module for Affine {
        fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ArrayViewMutD<'_, f32>)) {
            visitor(ParamKind::LinearWeight, self.weight.view_mut().into_dyn());
            visitor(ParamKind::LinearBias, self.bias.view_mut().into_dyn());
        }

        fn set_training(&mut self, training: bool) {
            self.training = training;
        }
    }

    #[test]
    fn test_parameter_counts() {
        let mut m = Affine {
            weight: Array2::zeros((3, 4)),
            bias: Array1::zeros(3),
            training: true,
        };
        assert_eq!(m.num_parameters(), 15);
        let counts = m.parameter_counts();
        assert!(counts.contains(&(ParamKind::LinearWeight, 12)));
        assert!(counts.contains(&(ParamKind::LinearBias, 3)));
    }

    #[test]
    fn test_train_eval_toggle() {
        let mut m = Some(Affine {
            weight: Array2::zeros((1, 1)),
            bias: Array1::zeros(1),
            training: true,
        });
        m.eval();
        assert!(!m.as_ref().unwrap().training);
        m.train();
        assert!(m.as_ref().unwrap().training);
    }

    #[test]
    fn test_absent_layer_is_identity() {
        struct Never;
        impl Module for Never {
            fn visit_parameters_mut(&mut self, _: &mut dyn FnMut(ParamKind, ArrayViewMutD<'_, f32>)) {}
            fn set_training(&mut self, _: bool) {}
        }
        impl Layer for Never {
            fn forward(&self, _: &Volume) -> Result<Volume> {
                unreachable!()
            }
        }

        let layer: Option<Never> = None;
        let input = Volume::ones((1, 1, 2, 2, 2));
        assert_eq!(layer.forward(&input).unwrap(), input);
    }
}
