//! Additive Gaussian noise injection

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use volgan_core::{gaussian_volume, sample_std, Error, Layer, Module, ParamKind, Result, Volume};

/// How the standard deviation of injected noise is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NoiseScale {
    /// Constant standard deviation
    Fixed(f32),
    /// Fraction of the input's own sample standard deviation
    InputStdFraction(f32),
}

/// Noise injection hook; disabled unless explicitly enabled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    pub enabled: bool,
    pub scale: NoiseScale,
}

impl NoiseConfig {
    pub fn disabled(scale: NoiseScale) -> Self {
        Self { enabled: false, scale }
    }

    pub fn enabled(scale: NoiseScale) -> Self {
        Self { enabled: true, scale }
    }

    fn validate(&self) -> Result<()> {
        let value = match self.scale {
            NoiseScale::Fixed(v) | NoiseScale::InputStdFraction(v) => v,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(Error::InvalidConfig(format!("noise scale must be non-negative, got {}", value)));
        }
        Ok(())
    }
}

/// Adds zero-mean Gaussian noise to its input while training
#[derive(Debug)]
pub struct GaussianNoise {
    config: NoiseConfig,
    training: bool,
    rng: Mutex<StdRng>,
}

impl GaussianNoise {
    pub fn new(config: NoiseConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            training: true,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Whether a forward pass would perturb its input right now
    pub fn is_active(&self) -> bool {
        self.config.enabled && self.training
    }
}

impl Module for GaussianNoise {
    fn visit_parameters_mut(&mut self, _visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {}

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl Layer for GaussianNoise {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        if !self.is_active() {
            return Ok(input.clone());
        }
        let std = match self.config.scale {
            NoiseScale::Fixed(std) => std,
            NoiseScale::InputStdFraction(fraction) => fraction * sample_std(input),
        };
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let noise = gaussian_volume(input.dim(), 0.0, std, &mut *rng)?;
        Ok(input + &noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    #[test]
    fn test_disabled_is_identity() {
        let noise = GaussianNoise::new(NoiseConfig::disabled(NoiseScale::Fixed(0.1)), 0).unwrap();
        assert!(!noise.is_active());
        let input = Volume::ones((1, 1, 4, 4, 4));
        assert_eq!(noise.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_eval_suppresses_noise() {
        let mut noise = GaussianNoise::new(NoiseConfig::enabled(NoiseScale::Fixed(0.1)), 0).unwrap();
        assert!(noise.is_active());
        noise.eval();
        let input = Volume::ones((1, 1, 4, 4, 4));
        assert_eq!(noise.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_fixed_noise_magnitude() {
        let noise = GaussianNoise::new(NoiseConfig::enabled(NoiseScale::Fixed(0.1)), 5).unwrap();
        let input = Volume::zeros((1, 1, 32, 32, 32));
        let out = noise.forward(&input).unwrap();
        assert!((sample_std(&out) - 0.1).abs() < 0.005);
    }

    #[test]
    fn test_relative_noise_tracks_input() {
        let noise = GaussianNoise::new(NoiseConfig::enabled(NoiseScale::InputStdFraction(0.5)), 5).unwrap();
        let input = Array5::from_shape_fn((1, 1, 32, 32, 32), |(_, _, d, _, _)| if d % 2 == 0 { 2.0 } else { -2.0 });
        let out = noise.forward(&input).unwrap();
        let diff = &out - &input;
        let expected = 0.5 * sample_std(&input);
        assert!((sample_std(&diff) - expected).abs() < 0.05 * expected);
    }

    #[test]
    fn test_rejects_negative_scale() {
        assert!(GaussianNoise::new(NoiseConfig::enabled(NoiseScale::Fixed(-1.0)), 0).is_err());
    }
}
