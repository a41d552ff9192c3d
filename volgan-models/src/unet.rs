//! Encoder/decoder core shared by the convolutional generators

use crate::blocks::{BlockConfig, DownBlock, UpBlock, WideDownBlock, WideUpBlock};
use tracing::trace;
use volgan_core::{Dims3, Error, Layer, Module, ParamKind, Result, SkipLayer, Volume};

/// One encoder stage, plain or wide
#[derive(Debug)]
pub enum EncoderStage {
    Plain(DownBlock),
    Wide(WideDownBlock),
}

impl EncoderStage {
    pub fn config(&self) -> &BlockConfig {
        match self {
            EncoderStage::Plain(block) => block.config(),
            EncoderStage::Wide(block) => block.config(),
        }
    }

    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        match self {
            EncoderStage::Plain(block) => block.output_extent(input),
            EncoderStage::Wide(block) => block.output_extent(input),
        }
    }
}

impl Module for EncoderStage {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        match self {
            EncoderStage::Plain(block) => block.visit_parameters_mut(visitor),
            EncoderStage::Wide(block) => block.visit_parameters_mut(visitor),
        }
    }

    fn set_training(&mut self, training: bool) {
        match self {
            EncoderStage::Plain(block) => block.set_training(training),
            EncoderStage::Wide(block) => block.set_training(training),
        }
    }
}

impl Layer for EncoderStage {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        match self {
            EncoderStage::Plain(block) => block.forward(input),
            EncoderStage::Wide(block) => block.forward(input),
        }
    }
}

/// One decoder stage, plain or wide
#[derive(Debug)]
pub enum DecoderStage {
    Plain(UpBlock),
    Wide(WideUpBlock),
}

impl DecoderStage {
    pub fn config(&self) -> &BlockConfig {
        match self {
            DecoderStage::Plain(block) => block.config(),
            DecoderStage::Wide(block) => block.config(),
        }
    }

    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        match self {
            DecoderStage::Plain(block) => block.output_extent(input),
            DecoderStage::Wide(block) => block.output_extent(input),
        }
    }
}

impl Module for DecoderStage {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        match self {
            DecoderStage::Plain(block) => block.visit_parameters_mut(visitor),
            DecoderStage::Wide(block) => block.visit_parameters_mut(visitor),
        }
    }

    fn set_training(&mut self, training: bool) {
        match self {
            DecoderStage::Plain(block) => block.set_training(training),
            DecoderStage::Wide(block) => block.set_training(training),
        }
    }
}

impl SkipLayer for DecoderStage {
    fn forward(&self, input: &Volume, skip: &Volume) -> Result<Volume> {
        match self {
            DecoderStage::Plain(block) => block.forward(input, skip),
            DecoderStage::Wide(block) => block.forward(input, skip),
        }
    }
}

/// Encoder stages feeding a decoder that consumes their activations in reverse
///
/// Decoder stage `i` receives the previous decoder output (the deepest encoder
/// activation for `i = 0`) and concatenates encoder activation `n - 2 - i`.
#[derive(Debug)]
pub struct UNet {
    encoder: Vec<EncoderStage>,
    decoder: Vec<DecoderStage>,
}

impl UNet {
    /// Assemble the stages, checking that channel counts chain up
    pub fn new(encoder: Vec<EncoderStage>, decoder: Vec<DecoderStage>) -> Result<Self> {
        if encoder.is_empty() || decoder.len() + 1 != encoder.len() {
            return Err(Error::InvalidConfig(format!(
                "U-Net needs one decoder stage fewer than encoder stages, got {} and {}",
                encoder.len(),
                decoder.len()
            )));
        }
        for (i, pair) in encoder.windows(2).enumerate() {
            if pair[0].config().out_channels != pair[1].config().in_channels {
                return Err(Error::InvalidConfig(format!(
                    "encoder stage {} emits {} channels but stage {} expects {}",
                    i,
                    pair[0].config().out_channels,
                    i + 1,
                    pair[1].config().in_channels
                )));
            }
        }
        let mut channels = encoder[encoder.len() - 1].config().out_channels;
        for (i, stage) in decoder.iter().enumerate() {
            if stage.config().in_channels != channels {
                return Err(Error::InvalidConfig(format!(
                    "decoder stage {} expects {} channels but receives {}",
                    i,
                    stage.config().in_channels,
                    channels
                )));
            }
            channels = stage.config().out_channels + encoder[encoder.len() - 2 - i].config().out_channels;
        }
        Ok(Self { encoder, decoder })
    }

    /// Channels of the decoder's final concatenated output
    pub fn out_channels(&self) -> usize {
        let last = self.decoder.len() - 1;
        self.decoder[last].config().out_channels + self.encoder[0].config().out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.encoder[0].config().in_channels
    }

    /// Verify that every upsampled activation lands on its skip's extent
    ///
    /// Returns the spatial extent of the decoder output.
    pub fn check_extent(&self, input: Dims3) -> Result<Dims3> {
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut extent = input;
        for stage in &self.encoder {
            extent = stage.output_extent(extent)?;
            skips.push(extent);
        }
        for (i, stage) in self.decoder.iter().enumerate() {
            let skip = skips[skips.len() - 2 - i];
            let upsampled = stage.output_extent(extent)?;
            if upsampled != skip {
                return Err(Error::ShapeMismatch(format!(
                    "input extent {}: decoder stage {} produces {} but its skip is {}",
                    input, i, upsampled, skip
                )));
            }
            extent = skip;
        }
        Ok(extent)
    }

    pub fn forward(&self, input: &Volume) -> Result<Volume> {
        let mut activations: Vec<Volume> = Vec::with_capacity(self.encoder.len());
        for (i, stage) in self.encoder.iter().enumerate() {
            let y = stage.forward(activations.last().unwrap_or(input))?;
            trace!(stage = i, shape = ?y.shape(), "encoder");
            activations.push(y);
        }

        let mut x = activations
            .pop()
            .ok_or_else(|| Error::InvalidConfig("U-Net has no encoder stages".to_string()))?;
        for (i, stage) in self.decoder.iter().enumerate() {
            let skip = activations
                .pop()
                .ok_or_else(|| Error::InvalidConfig("U-Net decoder outnumbers its skips".to_string()))?;
            x = stage.forward(&x, &skip)?;
            trace!(stage = i, shape = ?x.shape(), "decoder");
        }
        Ok(x)
    }
}

impl Module for UNet {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        for stage in &mut self.encoder {
            stage.visit_parameters_mut(visitor);
        }
        for stage in &mut self.decoder {
            stage.visit_parameters_mut(visitor);
        }
    }

    fn set_training(&mut self, training: bool) {
        for stage in &mut self.encoder {
            stage.set_training(training);
        }
        for stage in &mut self.decoder {
            stage.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn tiny(rng: &mut StdRng) -> (Vec<EncoderStage>, Vec<DecoderStage>) {
        let encoder = vec![
            EncoderStage::Plain(DownBlock::new(BlockConfig::new(1, 2).normalize(false), rng).unwrap()),
            EncoderStage::Wide(
                WideDownBlock::new(
                    BlockConfig::new(2, 4).kernel(Dims3::cubic(4)).stride(Dims3::cubic(2)),
                    rng,
                )
                .unwrap(),
            ),
        ];
        let decoder = vec![DecoderStage::Plain(
            UpBlock::new(BlockConfig::new(4, 2).kernel(Dims3::cubic(4)).stride(Dims3::cubic(2)), rng).unwrap(),
        )];
        (encoder, decoder)
    }

    #[test]
    fn test_forward_concatenates_first_skip() {
        let mut rng = StdRng::seed_from_u64(1);
        let (encoder, decoder) = tiny(&mut rng);
        let net = UNet::new(encoder, decoder).unwrap();
        assert_eq!((net.in_channels(), net.out_channels()), (1, 4));
        assert_eq!(net.check_extent(Dims3::cubic(8)).unwrap(), Dims3::cubic(8));
        let out = net.forward(&Volume::ones((1, 1, 8, 8, 8))).unwrap();
        assert_eq!(out.shape(), &[1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_odd_extent_is_rejected_before_forward() {
        let mut rng = StdRng::seed_from_u64(1);
        let (encoder, decoder) = tiny(&mut rng);
        let net = UNet::new(encoder, decoder).unwrap();
        // 7 -> 3 -> 6, which cannot meet the 7-wide skip.
        assert!(matches!(net.check_extent(Dims3::cubic(7)), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_channel_chain_is_checked() {
        let mut rng = StdRng::seed_from_u64(1);
        let (encoder, _) = tiny(&mut rng);
        let bad = vec![DecoderStage::Plain(UpBlock::new(BlockConfig::new(3, 2), &mut rng).unwrap())];
        assert!(matches!(UNet::new(encoder, bad), Err(Error::InvalidConfig(_))));
    }
}
