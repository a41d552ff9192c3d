//! Bernoulli dropout with a seedable mask generator

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;
use volgan_core::{Error, Layer, Module, ParamKind, Result, Volume};

/// Zeroes activations with probability `p` while training, identity otherwise
///
/// Survivors are scaled by `1 / (1 - p)`. Masks are drawn from a generator
/// owned by the layer, so a fixed seed reproduces the same sequence of masks.
#[derive(Debug)]
pub struct Dropout {
    probability: f32,
    keep_scale: f32,
    training: bool,
    rng: Mutex<StdRng>,
}

impl Dropout {
    pub fn new(probability: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::InvalidConfig(format!(
                "dropout probability must lie in [0, 1), got {}",
                probability
            )));
        }
        Ok(Self {
            probability,
            keep_scale: 1.0 / (1.0 - probability),
            training: true,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Restart the mask sequence from `seed`
    pub fn reseed(&self, seed: u64) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *rng = StdRng::seed_from_u64(seed);
    }
}

impl Module for Dropout {
    fn visit_parameters_mut(&mut self, _visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {}

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl Layer for Dropout {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        if !self.training || self.probability == 0.0 {
            return Ok(input.clone());
        }
        let mut output = input.as_standard_layout().into_owned();
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (p, scale) = (self.probability, self.keep_scale);
        output.mapv_inplace(|v| if rng.gen::<f32>() < p { 0.0 } else { v * scale });
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_probability() {
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
        assert!(Dropout::new(0.0, 0).is_ok());
    }

    #[test]
    fn test_training_mask_statistics() {
        let dropout = Dropout::new(0.5, 11).unwrap();
        let out = dropout.forward(&Volume::ones((1, 4, 16, 16, 16))).unwrap();
        let zeros = out.iter().filter(|&&v| v == 0.0).count();
        let frac = zeros as f32 / out.len() as f32;
        assert!((frac - 0.5).abs() < 0.03, "dropped fraction {}", frac);
        assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_seed_reproducibility() {
        let input = Volume::ones((1, 2, 4, 4, 4));
        let a = Dropout::new(0.5, 3).unwrap();
        let b = Dropout::new(0.5, 3).unwrap();
        let first = a.forward(&input).unwrap();
        assert_eq!(first, b.forward(&input).unwrap());
        assert_ne!(first, a.forward(&input).unwrap());
        a.reseed(3);
        assert_eq!(first, a.forward(&input).unwrap());
    }

    #[test]
    fn test_eval_is_identity() {
        let mut dropout = Dropout::new(0.5, 3).unwrap();
        dropout.eval();
        assert!(!dropout.is_training());
        let input = Volume::from_elem((1, 1, 3, 3, 3), 0.7);
        assert_eq!(dropout.forward(&input).unwrap(), input);
    }
}
