//! Wide 3D U-Net generator

use crate::blocks::{BlockConfig, DownBlock, UpBlock, WideDownBlock, WideUpBlock};
use crate::config::GeneratorConfig;
use crate::unet::{DecoderStage, EncoderStage, UNet};
use rand::Rng;
use tracing::{debug, trace};
use volgan_core::{Dims3, Layer, Module, ParamKind, Result, Volume, VolumeExt};
use volgan_layers::{trilinear, Activation, Conv3d, ConvConfig, GaussianNoise, NoiseConfig};

/// Shallower U-Net whose inner stages each carry a width-preserving convolution
///
/// Unlike [`crate::GeneratorUNet`] the projection runs at full resolution and
/// the bounded result is resampled to `output_size` afterwards.
#[derive(Debug)]
pub struct GeneratorWideUNet {
    config: GeneratorConfig,
    input_noise: GaussianNoise,
    unet: UNet,
    head: Conv3d,
}

impl GeneratorWideUNet {
    pub fn new<R: Rng + ?Sized>(config: GeneratorConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let k4 = Dims3::cubic(4);
        let s2 = Dims3::cubic(2);

        let encoder = vec![
            EncoderStage::Plain(DownBlock::new(
                BlockConfig::new(1, 16).kernel(Dims3::new(3, 4, 4)).normalize(false),
                rng,
            )?),
            EncoderStage::Wide(WideDownBlock::new(BlockConfig::new(16, 32), rng)?),
            EncoderStage::Wide(WideDownBlock::new(BlockConfig::new(32, 48).kernel(k4).stride(s2), rng)?),
            EncoderStage::Wide(WideDownBlock::new(
                BlockConfig::new(48, 96).kernel(Dims3::new(5, 4, 4)).stride(s2),
                rng,
            )?),
            EncoderStage::Wide(WideDownBlock::new(BlockConfig::new(96, 120).kernel(k4).stride(s2), rng)?),
            EncoderStage::Plain(DownBlock::new(
                BlockConfig::new(120, 120).normalize(false).dropout(0.5),
                rng,
            )?),
        ];

        let decoder = vec![
            DecoderStage::Plain(UpBlock::new(BlockConfig::new(120, 120).dropout(0.5), rng)?),
            DecoderStage::Wide(WideUpBlock::new(BlockConfig::new(240, 96).kernel(k4).stride(s2), rng)?),
            DecoderStage::Wide(WideUpBlock::new(
                BlockConfig::new(192, 48).kernel(k4).stride(s2).padding(Dims3::new(0, 1, 1)),
                rng,
            )?),
            DecoderStage::Wide(WideUpBlock::new(BlockConfig::new(96, 32).kernel(k4).stride(s2), rng)?),
            DecoderStage::Plain(UpBlock::new(BlockConfig::new(64, 16), rng)?),
        ];

        let unet = UNet::new(encoder, decoder)?;
        let head = Conv3d::new(ConvConfig::new(unet.out_channels(), 1), rng)?;
        let input_noise = GaussianNoise::new(config.input_noise, rng.gen())?;

        let mut generator = Self {
            config,
            input_noise,
            unet,
            head,
        };
        debug!(parameters = generator.num_parameters(), "built wide U-Net generator");
        Ok(generator)
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn input_noise(&self) -> &NoiseConfig {
        self.input_noise.config()
    }

    /// Check that an input extent is compatible with every skip connection
    pub fn check_input_extent(&self, extent: Dims3) -> Result<()> {
        self.unet.check_extent(extent).map(|_| ())
    }
}

impl Module for GeneratorWideUNet {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.unet.visit_parameters_mut(visitor);
        self.head.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.input_noise.set_training(training);
        self.unet.set_training(training);
    }
}

impl Layer for GeneratorWideUNet {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        self.check_input_extent(input.spatial())?;
        let x = self.input_noise.forward(input)?;
        let features = self.unet.forward(&x)?;
        let mut projected = self.head.forward(&features)?;
        Activation::Tanh.apply_inplace(&mut projected);
        trace!(shape = ?projected.shape(), "projected decoder output");
        trilinear(&projected, self.config.output_size)
    }
}
