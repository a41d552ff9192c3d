//! Basic usage example for volgan
//!
//! This example demonstrates the full set of networks:
//! - Building every generator and the discriminator from one seed
//! - Applying the normal weight initialization
//! - Running reference-extent forward passes
//!
//! Set `RUST_LOG=debug` (or `trace`) to see construction and per-stage logs.

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use volgan_core::parallel::{init_thread_pool, ThreadPoolConfig};
use volgan_core::{gaussian_volume, Layer, Module, VolumeExt};
use volgan_layers::weights_init_normal;
use volgan_models::{
    build_generator, Discriminator, DiscriminatorConfig, GeneratorConfig, GeneratorKind, REFERENCE_INPUT,
};

const SEED: u64 = 2024;

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("volgan basic usage");
    init_thread_pool(ThreadPoolConfig::default())?;
    let mut rng = StdRng::seed_from_u64(SEED);

    let input = gaussian_volume(
        (1, 1, REFERENCE_INPUT.depth, REFERENCE_INPUT.height, REFERENCE_INPUT.width),
        0.0,
        1.0,
        &mut rng,
    )?;
    let condition = gaussian_volume((1, 1, 20, 17, 17), 0.0, 1.0, &mut rng)?;
    info!(shape = ?input.shape(), "input volume");

    let mut discriminator = Discriminator::new(DiscriminatorConfig::default(), &mut rng)?;
    weights_init_normal(&mut discriminator, &mut rng)?;
    discriminator.eval();

    for kind in GeneratorKind::ALL {
        let mut generator = build_generator(kind, GeneratorConfig::default(), &mut rng)
            .with_context(|| format!("building {} generator", kind.name()))?;
        weights_init_normal(&mut generator, &mut rng)?;
        generator.eval();

        let fake = generator
            .forward(&input)
            .with_context(|| format!("running {} generator", kind.name()))?;
        let scores = discriminator.forward(&fake, &condition)?;
        let mean_score = scores.mean().unwrap_or(0.0);
        info!(
            generator = kind.name(),
            parameters = generator.num_parameters(),
            output = %fake.spatial(),
            patches = %scores.spatial(),
            mean_score,
            "forward pass"
        );
    }

    info!(parameters = discriminator.num_parameters(), "discriminator");
    Ok(())
}
