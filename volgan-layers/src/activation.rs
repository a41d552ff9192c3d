//! Element-wise nonlinearities

use serde::{Deserialize, Serialize};
use volgan_core::parallel::should_parallelize;
use volgan_core::Volume;

/// Negative slope used by every leaky rectification in the networks
pub const LEAKY_SLOPE: f32 = 0.2;

/// Activation functions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    /// Leaky ReLU with the given negative slope
    LeakyRelu(f32),
    /// Bounded to (-1, 1)
    Tanh,
    /// Bounded to (0, 1)
    Sigmoid,
}

impl Activation {
    fn scalar(self, x: f32) -> f32 {
        match self {
            Activation::LeakyRelu(slope) => {
                if x >= 0.0 {
                    x
                } else {
                    x * slope
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Apply in place
    pub fn apply_inplace(self, volume: &mut Volume) {
        if should_parallelize(volume.len() / 4096) {
            volgan_core::parallel::execute_parallel(|| volume.par_mapv_inplace(|x| self.scalar(x)));
        } else {
            volume.mapv_inplace(|x| self.scalar(x));
        }
    }

    /// Apply to a copy
    pub fn apply(self, volume: &Volume) -> Volume {
        let mut out = volume.to_owned();
        self.apply_inplace(&mut out);
        out
    }
}

pub fn leaky_relu(volume: &Volume, slope: f32) -> Volume {
    Activation::LeakyRelu(slope).apply(volume)
}

pub fn tanh(volume: &Volume) -> Volume {
    Activation::Tanh.apply(volume)
}

pub fn sigmoid(volume: &Volume) -> Volume {
    Activation::Sigmoid.apply(volume)
}
