//! Conditional PatchGAN discriminator

use crate::blocks::{BlockConfig, DownBlock};
use crate::config::DiscriminatorConfig;
use rand::Rng;
use tracing::{debug, trace};
use volgan_core::{concat_channels, Dims3, Error, Layer, Module, ParamKind, Result, Volume, VolumeExt};
use volgan_layers::{trilinear, Activation, Conv3d, ConvConfig, GaussianNoise};

/// Scores a one-channel candidate volume against a one-channel condition
///
/// The pair is concatenated along channels and reduced to a patch map of
/// probabilities in (0, 1). A candidate whose spatial extent differs from the
/// condition is first resampled to the condition's extent.
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    noise: GaussianNoise,
    stages: Vec<DownBlock>,
    head: Conv3d,
}

impl Discriminator {
    pub fn new<R: Rng + ?Sized>(config: DiscriminatorConfig, rng: &mut R) -> Result<Self> {
        let p0 = Dims3::cubic(0);
        let stages = [
            BlockConfig::new(2, 24).padding(p0).normalize(false),
            BlockConfig::new(24, 48).stride(Dims3::cubic(2)).padding(p0),
            BlockConfig::new(48, 96).padding(p0),
            BlockConfig::new(96, 120),
        ]
        .into_iter()
        .map(|stage| DownBlock::new(stage.bias(true), rng))
        .collect::<Result<Vec<_>>>()?;

        let head = Conv3d::new(
            ConvConfig::new(120, 1)
                .kernel(Dims3::cubic(5))
                .padding(p0)
                .bias(false),
            rng,
        )?;
        let noise = GaussianNoise::new(config.noise, rng.gen())?;

        let mut discriminator = Self {
            config,
            noise,
            stages,
            head,
        };
        debug!(parameters = discriminator.num_parameters(), "built patch discriminator");
        Ok(discriminator)
    }

    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }

    /// Patch-map extent for a condition of the given extent
    pub fn output_extent(&self, input: Dims3) -> Result<Dims3> {
        let mut extent = input;
        for stage in &self.stages {
            extent = stage.output_extent(extent)?;
        }
        let head = self.head.config();
        volgan_layers::conv_output_extent(extent, head.kernel, head.stride, head.padding)
    }

    pub fn forward(&self, candidate: &Volume, condition: &Volume) -> Result<Volume> {
        if candidate.batch() != condition.batch() {
            return Err(Error::shape_mismatch(
                "discriminator batch",
                condition.batch(),
                candidate.batch(),
            ));
        }
        let extent = condition.spatial();
        self.output_extent(extent)?;

        let resampled;
        let candidate = if candidate.spatial() != extent {
            debug!(from = %candidate.spatial(), to = %extent, "resampling discriminator candidate");
            resampled = trilinear(candidate, extent)?;
            &resampled
        } else {
            candidate
        };

        let pair = concat_channels(candidate, condition)?;
        let mut x = self.noise.forward(&pair)?;
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.forward(&x)?;
            trace!(stage = i, shape = ?x.shape(), "discriminator");
        }
        let mut out = self.head.forward(&x)?;
        Activation::Sigmoid.apply_inplace(&mut out);
        Ok(out)
    }
}

impl Module for Discriminator {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        for stage in &mut self.stages {
            stage.visit_parameters_mut(visitor);
        }
        self.head.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.noise.set_training(training);
        for stage in &mut self.stages {
            stage.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use volgan_core::gaussian_volume;

    fn discriminator() -> Discriminator {
        Discriminator::new(DiscriminatorConfig::default(), &mut StdRng::seed_from_u64(7)).unwrap()
    }

    #[test]
    fn test_canonical_patch_map() {
        let disc = discriminator();
        assert_eq!(disc.output_extent(Dims3::new(20, 17, 17)).unwrap(), Dims3::new(2, 1, 1));

        let mut rng = StdRng::seed_from_u64(1);
        let condition = gaussian_volume((2, 1, 20, 17, 17), 0.0, 1.0, &mut rng).unwrap();
        let candidate = gaussian_volume((2, 1, 20, 17, 17), 0.0, 1.0, &mut rng).unwrap();
        let out = disc.forward(&candidate, &condition).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2, 1, 1]);
        assert!(out.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_candidate_is_resampled_to_condition() {
        let disc = discriminator();
        let condition = Volume::zeros((1, 1, 20, 17, 17));
        let candidate = Volume::from_elem((1, 1, 52, 49, 49), 0.5);
        let out = disc.forward(&candidate, &condition).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 1, 1]);

        // A constant candidate resamples to the same constant.
        let small = Volume::from_elem((1, 1, 20, 17, 17), 0.5);
        let direct = disc.forward(&small, &condition).unwrap();
        for (a, b) in out.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_parameter_count() {
        let mut disc = discriminator();
        // Four biased stage convolutions and a bias-free 5x5x5 head.
        assert_eq!(disc.num_parameters(), 483_144);
    }

    #[test]
    fn test_rejects_tiny_condition() {
        let disc = discriminator();
        let tiny = Volume::zeros((1, 1, 6, 6, 6));
        assert!(matches!(disc.forward(&tiny, &tiny), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_rejects_batch_mismatch() {
        let disc = discriminator();
        let a = Volume::zeros((1, 1, 20, 17, 17));
        let b = Volume::zeros((2, 1, 20, 17, 17));
        assert!(disc.forward(&a, &b).is_err());
    }
}
