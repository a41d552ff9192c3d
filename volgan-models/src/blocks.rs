//! Encoder and decoder stages shared by the U-Net generators and the discriminator
//!
//! A down stage is convolution, optional instance normalization, LeakyReLU and
//! optional dropout. An up stage does the same with a transposed convolution
//! and then concatenates the matching encoder activation along channels. The
//! wide variants put an extra width-preserving 3×3×3 stage in front.

use rand::Rng;
use serde::{Deserialize, Serialize};
use volgan_core::{concat_channels, Dims3, Layer, Module, ParamKind, Result, SkipLayer, Volume};
use volgan_layers::{
    conv_output_extent, conv_transpose_output_extent, Activation, Conv3d, ConvConfig, ConvTranspose3d, Dropout,
    InstanceNorm3d, LEAKY_SLOPE,
};

/// Hyper-parameters of one encoder or decoder stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: Dims3,
    pub stride: Dims3,
    pub padding: Dims3,
    /// Instance normalization after the convolution
    pub normalize: bool,
    /// Dropout probability; zero disables the layer
    pub dropout: f32,
    /// Learnable bias on the convolution
    pub bias: bool,
}

impl BlockConfig {
    /// 3×3×3 kernel, stride 1, padding 1, normalized, no dropout, no bias
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: Dims3::cubic(3),
            stride: Dims3::cubic(1),
            padding: Dims3::cubic(1),
            normalize: true,
            dropout: 0.0,
            bias: false,
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

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    fn conv_config(&self) -> ConvConfig {
        ConvConfig::new(self.in_channels, self.out_channels)
            .kernel(self.kernel)
            .stride(self.stride)
            .padding(self.padding)
            .bias(self.bias)
    }

    /// The width-preserving 3×3×3 stage placed in front of a wide block
    fn widening(&self) -> Self {
        Self::new(self.in_channels, self.in_channels).dropout(self.dropout)
    }
}

/// Normalization, LeakyReLU and dropout applied after every stage convolution
#[derive(Debug)]
pub(crate) struct StageTail {
    norm: Option<InstanceNorm3d>,
    dropout: Option<Dropout>,
}

impl StageTail {
    pub(crate) fn new<R: Rng + ?Sized>(
        channels: usize,
        normalize: bool,
        dropout: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let norm = normalize.then(|| InstanceNorm3d::new(channels));
        let dropout = if dropout > 0.0 {
            Some(Dropout::new(dropout, rng.gen())?)
        } else {
            None
        };
        Ok(Self { norm, dropout })
    }

    fn from_config<R: Rng + ?Sized>(config: &BlockConfig, rng: &mut R) -> Result<Self> {
        Self::new(config.out_channels, config.normalize, config.dropout, rng)
    }

    pub(crate) fn forward(&self, x: Volume) -> Result<Volume> {
        let mut x = self.norm.forward(&x)?;
        Activation::LeakyRelu(LEAKY_SLOPE).apply_inplace(&mut x);
        self.dropout.forward(&x)
    }
}

impl Module for StageTail {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.norm.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }
}

/// Strided convolution stage of an encoder
#[derive(Debug)]
pub struct DownBlock {
    config: BlockConfig,
    conv: Conv3d,
    tail: StageTail,
}

impl DownBlock {
    pub fn new<R: Rng + ?Sized>(config: BlockConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            conv: Conv3d::new(config.conv_config(), rng)?,
            tail: StageTail::from_config(&config, rng)?,
            config,
        })
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Spatial extent this stage produces from `input`
    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        conv_output_extent(input, self.config.kernel, self.config.stride, self.config.padding)
    }
}

impl Module for DownBlock {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.conv.visit_parameters_mut(visitor);
        self.tail.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.tail.set_training(training);
    }
}

impl Layer for DownBlock {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        self.tail.forward(self.conv.forward(input)?)
    }
}

/// Encoder stage with an extra width-preserving convolution in front
#[derive(Debug)]
pub struct WideDownBlock {
    widen: DownBlock,
    reduce: DownBlock,
}

impl WideDownBlock {
    pub fn new<R: Rng + ?Sized>(config: BlockConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            widen: DownBlock::new(config.widening(), rng)?,
            reduce: DownBlock::new(config, rng)?,
        })
    }

    pub fn config(&self) -> &BlockConfig {
        self.reduce.config()
    }

    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        self.reduce.output_extent(self.widen.output_extent(input)?)
    }
}

impl Module for WideDownBlock {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.widen.visit_parameters_mut(visitor);
        self.reduce.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.widen.set_training(training);
        self.reduce.set_training(training);
    }
}

impl Layer for WideDownBlock {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        self.reduce.forward(&self.widen.forward(input)?)
    }
}

/// Transposed-convolution stage without the skip concatenation
#[derive(Debug)]
struct UpStage {
    config: BlockConfig,
    deconv: ConvTranspose3d,
    tail: StageTail,
}

impl UpStage {
    fn new<R: Rng + ?Sized>(config: BlockConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            deconv: ConvTranspose3d::new(config.conv_config(), rng)?,
            tail: StageTail::from_config(&config, rng)?,
            config,
        })
    }

    fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        conv_transpose_output_extent(input, self.config.kernel, self.config.stride, self.config.padding)
    }

    fn forward(&self, input: &Volume) -> Result<Volume> {
        self.tail.forward(self.deconv.forward(input)?)
    }
}

impl Module for UpStage {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.deconv.visit_parameters_mut(visitor);
        self.tail.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.tail.set_training(training);
    }
}

/// Decoder stage: upsample, then concatenate the encoder skip along channels
///
/// The result has `out_channels + skip channels` channels and the skip's
/// spatial extent; an upsampled extent that differs from the skip is an error.
#[derive(Debug)]
pub struct UpBlock {
    stage: UpStage,
}

impl UpBlock {
    pub fn new<R: Rng + ?Sized>(config: BlockConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            stage: UpStage::new(config, rng)?,
        })
    }

    pub fn config(&self) -> &BlockConfig {
        &self.stage.config
    }

    /// Spatial extent of the upsampled activation, before concatenation
    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        self.stage.output_extent(input)
    }
}

impl Module for UpBlock {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.stage.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.stage.set_training(training);
    }
}

impl SkipLayer for UpBlock {
    fn forward(&self, input: &Volume, skip: &Volume) -> Result<Volume> {
        concat_channels(&self.stage.forward(input)?, skip)
    }
}

/// Decoder stage with an extra width-preserving transposed convolution in front
#[derive(Debug)]
pub struct WideUpBlock {
    widen: UpStage,
    reduce: UpStage,
}

impl WideUpBlock {
    pub fn new<R: Rng + ?Sized>(config: BlockConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            widen: UpStage::new(config.widening(), rng)?,
            reduce: UpStage::new(config, rng)?,
        })
    }

    pub fn config(&self) -> &BlockConfig {
        &self.reduce.config
    }

    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        self.reduce.output_extent(self.widen.output_extent(input)?)
    }
}

impl Module for WideUpBlock {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.widen.visit_parameters_mut(visitor);
        self.reduce.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.widen.set_training(training);
        self.reduce.set_training(training);
    }
}

impl SkipLayer for WideUpBlock {
    fn forward(&self, input: &Volume, skip: &Volume) -> Result<Volume> {
        let x = self.reduce.forward(&self.widen.forward(input)?)?;
        concat_channels(&x, skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use volgan_core::VolumeExt;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn ramp(shape: (usize, usize, usize, usize, usize)) -> Volume {
        Volume::from_shape_fn(shape, |(_, c, d, h, w)| ((c + 2 * d + 3 * h + 5 * w) % 7) as f32 - 3.0)
    }

    #[test]
    fn test_down_block_halves_extent() {
        let block = DownBlock::new(
            BlockConfig::new(2, 4).kernel(Dims3::cubic(4)).stride(Dims3::cubic(2)),
            &mut rng(),
        )
        .unwrap();
        let out = block.forward(&ramp((1, 2, 8, 8, 8))).unwrap();
        assert_eq!(out.shape(), &[1, 4, 4, 4, 4]);
        assert_eq!(block.output_extent(Dims3::cubic(8)).unwrap(), out.spatial());
    }

    #[test]
    fn test_down_block_parameters() {
        let mut plain = DownBlock::new(BlockConfig::new(2, 4).normalize(false), &mut rng()).unwrap();
        assert_eq!(plain.num_parameters(), 4 * 2 * 27);
        let mut biased = DownBlock::new(BlockConfig::new(2, 4).normalize(false).bias(true), &mut rng()).unwrap();
        assert_eq!(biased.num_parameters(), 4 * 2 * 27 + 4);
    }

    #[test]
    fn test_unnormalized_stage_is_conv_then_leaky() {
        let block = DownBlock::new(BlockConfig::new(1, 3).normalize(false), &mut rng()).unwrap();
        let input = ramp((1, 1, 5, 5, 5));
        let out = block.forward(&input).unwrap();
        let expected = volgan_layers::leaky_relu(&block.conv.forward(&input).unwrap(), LEAKY_SLOPE);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_wide_down_block_extent() {
        let block = WideDownBlock::new(
            BlockConfig::new(2, 3).kernel(Dims3::new(5, 4, 4)).stride(Dims3::cubic(2)),
            &mut rng(),
        )
        .unwrap();
        let out = block.forward(&ramp((1, 2, 12, 12, 12))).unwrap();
        assert_eq!(out.shape(), &[1, 3, 5, 6, 6]);
        assert_eq!(block.output_extent(Dims3::cubic(12)).unwrap(), Dims3::new(5, 6, 6));
    }

    #[test]
    fn test_up_block_concatenates_skip() {
        let block = UpBlock::new(
            BlockConfig::new(4, 2).kernel(Dims3::cubic(4)).stride(Dims3::cubic(2)),
            &mut rng(),
        )
        .unwrap();
        let skip = ramp((2, 3, 6, 6, 6));
        let out = block.forward(&ramp((2, 4, 3, 3, 3)), &skip).unwrap();
        assert_eq!(out.shape(), &[2, 5, 6, 6, 6]);
        // Skip channels are appended unchanged.
        assert_eq!(out.slice(ndarray::s![.., 2.., .., .., ..]), skip);
    }

    #[test]
    fn test_up_block_rejects_mismatched_skip() {
        let block = UpBlock::new(BlockConfig::new(4, 2), &mut rng()).unwrap();
        let result = block.forward(&ramp((1, 4, 3, 3, 3)), &ramp((1, 2, 4, 4, 4)));
        assert!(matches!(result, Err(volgan_core::Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_wide_up_block_asymmetric_padding() {
        let block = WideUpBlock::new(
            BlockConfig::new(6, 2)
                .kernel(Dims3::cubic(4))
                .stride(Dims3::cubic(2))
                .padding(Dims3::new(0, 1, 1)),
            &mut rng(),
        )
        .unwrap();
        let skip = ramp((1, 2, 8, 6, 6));
        let out = block.forward(&ramp((1, 6, 3, 3, 3)), &skip).unwrap();
        assert_eq!(out.shape(), &[1, 4, 8, 6, 6]);
        assert_eq!(block.output_extent(Dims3::cubic(3)).unwrap(), Dims3::new(8, 6, 6));
    }

    #[test]
    fn test_dropout_follows_mode() {
        let mut block = DownBlock::new(BlockConfig::new(1, 2).normalize(false).dropout(0.5), &mut rng()).unwrap();
        let input = Volume::ones((1, 1, 6, 6, 6));
        block.eval();
        let a = block.forward(&input).unwrap();
        assert_eq!(a, block.forward(&input).unwrap());
        block.train();
        let b = block.forward(&input).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_serde() {
        let config = BlockConfig::new(48, 96).kernel(Dims3::new(5, 4, 4)).dropout(0.5);
        let json = serde_json::to_string(&config).unwrap();
        let back: BlockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
