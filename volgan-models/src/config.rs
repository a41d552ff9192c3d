//! Network configurations and reference extents

use serde::{Deserialize, Serialize};
use volgan_core::{Dims3, Error, Result};
use volgan_layers::{NoiseConfig, NoiseScale};

/// Extent of the input volumes the networks were laid out for
pub const REFERENCE_INPUT: Dims3 = Dims3 {
    depth: 52,
    height: 49,
    width: 49,
};

/// Extent every generator resamples its output to
pub const CANONICAL_OUTPUT: Dims3 = Dims3 {
    depth: 20,
    height: 17,
    width: 17,
};

/// Row width handled by the dense generator
pub const DENSE_FEATURES: usize = 49;

fn check_extent(name: &str, extent: Dims3) -> Result<()> {
    if extent.volume() == 0 {
        return Err(Error::InvalidConfig(format!("{} must be non-empty, got {}", name, extent)));
    }
    Ok(())
}

/// Configuration shared by the convolutional generators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Spatial extent of the generated volume
    pub output_size: Dims3,
    /// Noise added to the input while training
    pub input_noise: NoiseConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            output_size: CANONICAL_OUTPUT,
            input_noise: NoiseConfig::disabled(NoiseScale::InputStdFraction(0.5)),
        }
    }
}

impl GeneratorConfig {
    pub fn with_output_size(mut self, output_size: Dims3) -> Self {
        self.output_size = output_size;
        self
    }

    pub fn with_input_noise(mut self, input_noise: NoiseConfig) -> Self {
        self.input_noise = input_noise;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_extent("generator output size", self.output_size)
    }
}

/// Configuration of the PatchGAN discriminator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Noise added to the concatenated pair while training
    pub noise: NoiseConfig,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            noise: NoiseConfig::disabled(NoiseScale::Fixed(0.1)),
        }
    }
}

impl DiscriminatorConfig {
    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }
}

/// Configuration of the dense generator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedConfig {
    /// Extent rows are regrouped into before resampling; its width is the row length
    pub volume: Dims3,
    /// Spatial extent of the generated volume
    pub output_size: Dims3,
}

impl Default for FullyConnectedConfig {
    fn default() -> Self {
        Self {
            volume: REFERENCE_INPUT,
            output_size: CANONICAL_OUTPUT,
        }
    }
}

impl FullyConnectedConfig {
    pub fn with_volume(mut self, volume: Dims3) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_output_size(mut self, output_size: Dims3) -> Self {
        self.output_size = output_size;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_extent("dense volume", self.volume)?;
        check_extent("dense output size", self.output_size)?;
        if self.volume.width != DENSE_FEATURES {
            return Err(Error::InvalidConfig(format!(
                "dense volume width must be {}, got {}",
                DENSE_FEATURES, self.volume.width
            )));
        }
        Ok(())
    }
}
