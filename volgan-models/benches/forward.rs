use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, SeedableRng};
use volgan_core::{gaussian_volume, Layer, Module};
use volgan_models::{
    Discriminator, DiscriminatorConfig, FullyConnectedConfig, FullyConnectedNetwork, GeneratorConfig, GeneratorUNet,
    GeneratorWideUNet,
};

const SEED: u64 = 42;

fn generators(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let input = gaussian_volume((1, 1, 52, 49, 49), 0.0, 1.0, &mut rng).unwrap();

    let mut basic = GeneratorUNet::new(GeneratorConfig::default(), &mut rng).unwrap();
    let mut wide = GeneratorWideUNet::new(GeneratorConfig::default(), &mut rng).unwrap();
    let mut dense = FullyConnectedNetwork::new(FullyConnectedConfig::default(), &mut rng).unwrap();
    basic.eval();
    wide.eval();
    dense.eval();
    let networks: [(&str, &dyn Layer); 3] = [("basic", &basic), ("wide", &wide), ("fully_connected", &dense)];

    let mut g = c.benchmark_group("generator forward");
    g.sample_size(10);

    for (name, network) in networks {
        g.bench_with_input(BenchmarkId::from_parameter(name), &(network, &input), |b, &(network, input)| {
            b.iter(|| std::hint::black_box(network).forward(std::hint::black_box(input)));
        });
    }

    g.finish();
}

fn discriminator(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let candidate = gaussian_volume((4, 1, 20, 17, 17), 0.0, 1.0, &mut rng).unwrap();
    let condition = gaussian_volume((4, 1, 20, 17, 17), 0.0, 1.0, &mut rng).unwrap();
    let mut disc = Discriminator::new(DiscriminatorConfig::default(), &mut rng).unwrap();
    disc.eval();

    c.bench_function("discriminator forward", |b| {
        b.iter(|| std::hint::black_box(&disc).forward(std::hint::black_box(&candidate), std::hint::black_box(&condition)));
    });
}

criterion_group!(benches, generators, discriminator);
criterion_main!(benches);
