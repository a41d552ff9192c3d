//! Build any generator variant behind one interface

use crate::config::{FullyConnectedConfig, GeneratorConfig};
use crate::{FullyConnectedNetwork, GeneratorUNet, GeneratorWideUNet};
use rand::Rng;
use serde::{Deserialize, Serialize};
use volgan_core::{Layer, Result};

/// Generator variants selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneratorKind {
    Basic,
    Wide,
    FullyConnected,
}

impl GeneratorKind {
    pub const ALL: [GeneratorKind; 3] = [GeneratorKind::Basic, GeneratorKind::Wide, GeneratorKind::FullyConnected];

    pub fn name(self) -> &'static str {
        match self {
            GeneratorKind::Basic => "basic",
            GeneratorKind::Wide => "wide",
            GeneratorKind::FullyConnected => "fully_connected",
        }
    }
}

/// Construct a generator of the given kind
///
/// The dense generator takes its output extent from `config`; its input
/// noise setting does not apply.
pub fn build_generator<R: Rng + ?Sized>(
    kind: GeneratorKind,
    config: GeneratorConfig,
    rng: &mut R,
) -> Result<Box<dyn Layer>> {
    Ok(match kind {
        GeneratorKind::Basic => Box::new(GeneratorUNet::new(config, rng)?),
        GeneratorKind::Wide => Box::new(GeneratorWideUNet::new(config, rng)?),
        GeneratorKind::FullyConnected => Box::new(FullyConnectedNetwork::new(
            FullyConnectedConfig::default().with_output_size(config.output_size),
            rng,
        )?),
    })
}
