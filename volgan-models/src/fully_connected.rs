//! Dense generator acting on rows of 49 voxels

use crate::blocks::StageTail;
use crate::config::{FullyConnectedConfig, DENSE_FEATURES};
use ndarray::Array2;
use rand::Rng;
use tracing::{debug, trace};
use volgan_core::{Error, Layer, Module, ParamKind, Result, Volume};
use volgan_layers::{trilinear, Activation, Linear};

/// (in features, out features, normalize, dropout) for each hidden stage
const STAGES: [(usize, usize, bool, f32); 10] = [
    (49, 49, false, 0.0),
    (49, 98, true, 0.0),
    (98, 196, true, 0.0),
    (196, 392, true, 0.0),
    (392, 784, true, 0.5),
    (784, 392, true, 0.5),
    (392, 196, true, 0.5),
    (196, 98, true, 0.0),
    (98, 49, true, 0.0),
    (49, 49, true, 0.0),
];

#[derive(Debug)]
struct DenseStage {
    linear: Linear,
    tail: StageTail,
}

impl Module for DenseStage {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        self.linear.visit_parameters_mut(visitor);
        self.tail.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        self.tail.set_training(training);
    }
}

/// Ten bias-free dense stages and a biased projection over the last axis
///
/// Normalization runs over each sample's whole spatial extent. The projected
/// rows are regrouped into `(N, 1, volume)` and resampled to `output_size`.
#[derive(Debug)]
pub struct FullyConnectedNetwork {
    config: FullyConnectedConfig,
    stages: Vec<DenseStage>,
    head: Linear,
}

impl FullyConnectedNetwork {
    pub fn new<R: Rng + ?Sized>(config: FullyConnectedConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let stages = STAGES
            .iter()
            .map(|&(inputs, outputs, normalize, dropout)| -> Result<DenseStage> {
                Ok(DenseStage {
                    linear: Linear::new(inputs, outputs, false, rng)?,
                    tail: StageTail::new(outputs, normalize, dropout, rng)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let head = Linear::new(DENSE_FEATURES, DENSE_FEATURES, true, rng)?;

        let mut network = Self { config, stages, head };
        debug!(parameters = network.num_parameters(), "built dense generator");
        Ok(network)
    }

    pub fn config(&self) -> &FullyConnectedConfig {
        &self.config
    }

    /// Run on a `(rows, 49)` matrix whose row count is a multiple of depth × height
    pub fn forward_rows(&self, rows: &Array2<f32>) -> Result<Volume> {
        let volume = self.config.volume;
        let per_sample = volume.depth * volume.height;
        if rows.ncols() != DENSE_FEATURES {
            return Err(Error::shape_mismatch("dense rows width", DENSE_FEATURES, rows.ncols()));
        }
        if rows.nrows() == 0 || rows.nrows() % per_sample != 0 {
            return Err(Error::ShapeMismatch(format!(
                "dense rows: row count {} is not a positive multiple of {}",
                rows.nrows(),
                per_sample
            )));
        }
        let batch = rows.nrows() / per_sample;
        let input = rows
            .to_shape((batch, 1, volume.depth, volume.height, volume.width))?
            .into_owned();
        self.forward(&input)
    }
}

impl Module for FullyConnectedNetwork {
    fn visit_parameters_mut(&mut self, visitor: &mut dyn FnMut(ParamKind, ndarray::ArrayViewMutD<'_, f32>)) {
        for stage in &mut self.stages {
            stage.visit_parameters_mut(visitor);
        }
        self.head.visit_parameters_mut(visitor);
    }

    fn set_training(&mut self, training: bool) {
        for stage in &mut self.stages {
            stage.set_training(training);
        }
    }
}

impl Layer for FullyConnectedNetwork {
    fn forward(&self, input: &Volume) -> Result<Volume> {
        let features = input.shape()[4];
        if features != DENSE_FEATURES {
            return Err(Error::shape_mismatch("dense input features", DENSE_FEATURES, features));
        }

        // Rows keep their width through every stage, so the regrouping is known up front.
        let volume = self.config.volume;
        if input.is_empty() || input.len() % volume.volume() != 0 {
            return Err(Error::ShapeMismatch(format!(
                "dense input of {} values cannot be regrouped into {} volumes",
                input.len(),
                volume
            )));
        }
        let batch = input.len() / volume.volume();

        let mut x = input.to_owned();
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.tail.forward(stage.linear.forward(&x)?)?;
            trace!(stage = i, shape = ?x.shape(), "dense");
        }
        let mut projected = self.head.forward(&x)?;
        Activation::Tanh.apply_inplace(&mut projected);

        let regrouped = projected.into_shape_with_order((batch, 1, volume.depth, volume.height, volume.width))?;
        trilinear(&regrouped, self.config.output_size)
    }
}
