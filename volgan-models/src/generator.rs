//! Basic 3D U-Net generator

use crate::blocks::{BlockConfig, DownBlock, UpBlock};
use crate::config::GeneratorConfig;
use crate::unet::{DecoderStage, EncoderStage, UNet};
use rand::Rng;
use tracing::{debug, trace};
use volgan_core::{Dims3, Layer, Module, ParamKind, Result, Volume, VolumeExt};
use volgan_layers::{trilinear, Activation, Conv3d, ConvConfig, GaussianNoise};

/// Eight encoder stages, seven decoder stages with skips, then resample and project
///
/// Maps `(B, 1, D, H, W)` to `(B, 1, output_size)` with values in (-1, 1). The
/// stage layout fits inputs of extent 52×49×49.
#[derive(Debug)]
pub struct GeneratorUNet {
    config: GeneratorConfig,
    input_noise: GaussianNoise,
    unet: UNet,
    head: Conv3d,
}

impl GeneratorUNet {
    pub fn new<R: Rng + ?Sized>(config: GeneratorConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let k4 = Dims3::cubic(4);
        let s2 = Dims3::cubic(2);

        let encoder = [
            BlockConfig::new(1, 16).kernel(Dims3::new(3, 4, 4)).normalize(false),
            BlockConfig::new(16, 32).stride(s2),
            BlockConfig::new(32, 64),
            BlockConfig::new(64, 128).kernel(Dims3::new(5, 4, 4)).stride(s2),
            BlockConfig::new(128, 192).kernel(k4).stride(s2),
            BlockConfig::new(192, 256),
            BlockConfig::new(256, 320).kernel(k4).stride(s2).dropout(0.5),
            BlockConfig::new(320, 320).normalize(false).dropout(0.5),
        ]
        .into_iter()
        .map(|stage| DownBlock::new(stage, rng).map(EncoderStage::Plain))
        .collect::<Result<Vec<_>>>()?;

        let decoder = [
            BlockConfig::new(320, 320).dropout(0.5),
            BlockConfig::new(640, 256).kernel(k4).stride(s2),
            BlockConfig::new(512, 192),
            BlockConfig::new(384, 128).kernel(k4).stride(s2),
            BlockConfig::new(256, 64).kernel(k4).stride(s2).padding(Dims3::new(0, 1, 1)),
            BlockConfig::new(128, 32),
            BlockConfig::new(64, 16).kernel(k4).stride(s2),
        ]
        .into_iter()
        .map(|stage| UpBlock::new(stage, rng).map(DecoderStage::Plain))
        .collect::<Result<Vec<_>>>()?;

        let unet = UNet::new(encoder, decoder)?;
        let head = Conv3d::new(ConvConfig::new(unet.out_channels(), 1), rng)?;
        let input_noise = GaussianNoise::new(config.input_noise, rng.gen())?;

        let mut generator = Self {
            config,
            input_noise,
            unet,
            head,
        };
        debug!(parameters = generator.num_parameters(), "built basic U-Net generator");
        Ok(generator)
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Check that an input extent is compatible with every skip connection
    pub fn check_input_extent(&self, extent: Dims3) -> Result<()> {
        self.unet.check_extent(extent).map(|_| ())
    }
}

impl Module for GeneratorUNet {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.unet.visit_parameters_mut(visitor);
        self.head.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.input_noise.set_training(training);
        self.unet.set_training(training);
    }
}

impl Layer for GeneratorUNet {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        self.check_input_extent(input.spatial())?;
        let x = self.input_noise.forward(input)?;
        let features = self.unet.forward(&x)?;
        let resampled = trilinear(&features, self.config.output_size)?;
        trace!(shape = ?resampled.shape(), "resampled decoder output");
        let mut out = self.head.forward(&resampled)?;
        Activation::Tanh.apply_inplace(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use volgan_core::Error;

    #[test]
    fn test_reference_extent_is_compatible() {
        let generator = GeneratorUNet::new(GeneratorConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        assert!(generator.check_input_extent(Dims3::new(52, 49, 49)).is_ok());
        assert_eq!(generator.unet.check_extent(Dims3::new(52, 49, 49)).unwrap(), Dims3::new(52, 48, 48));
    }

    #[test]
    fn test_incompatible_extent_fails_fast() {
        let generator = GeneratorUNet::new(GeneratorConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        let result = generator.forward(&Volume::zeros((1, 1, 40, 40, 40)));
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_parameter_count() {
        let mut generator = GeneratorUNet::new(GeneratorConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        // Bias-free stage convolutions plus the 32 -> 1 head with bias.
        assert_eq!(generator.num_parameters(), 31_908_961);
        assert_eq!(generator.head.config().in_channels, 32);
    }
}
