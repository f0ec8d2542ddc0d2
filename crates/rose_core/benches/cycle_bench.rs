//! Cycle and Tick Throughput Benchmarks
//!
//! Measures a single alignment cycle and whole polling ticks over pages of
//! increasing size, to check the per-tick budget of an interactive session.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rose_core::{
    encode, FeatureVector, Monitor, Neuron, Nexus, NexusConfig, Observation, PatternLibrary,
    RawAttributes,
};
use std::time::Duration;

const TAGS: [&str; 8] = ["div", "li", "a", "button", "input", "img", "h3", "span"];

fn random_attrs(rng: &mut ChaCha8Rng) -> RawAttributes {
    RawAttributes {
        tag: TAGS[rng.gen_range(0..TAGS.len())].to_string(),
        role: None,
        text_len: rng.gen_range(0..40),
        visible: rng.gen_bool(0.9),
        clickable: rng.gen_bool(0.3),
        href: rng.gen_bool(0.3),
        child_count: rng.gen_range(0..4),
    }
}

/// A synthetic page: `elements` ids, each with up to five neighbours.
fn generate_page(elements: usize, seed: u64) -> Vec<Observation> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..elements)
        .map(|i| {
            let n = rng.gen_range(0..=5);
            let neighbours = (0..n).map(|_| random_attrs(&mut rng)).collect();
            Observation::seen(&format!("el-{}", i), random_attrs(&mut rng), neighbours)
        })
        .collect()
}

fn bench_single_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    let lib = PatternLibrary::default_priors();
    let nexus = Nexus::default();
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    let x = encode(&random_attrs(&mut rng));
    for n in [0usize, 2, 5] {
        let neighbours: Vec<FeatureVector> =
            (0..n).map(|_| encode(&random_attrs(&mut rng))).collect();
        // Warm neuron, already past its first switch
        let mut neuron = Neuron::new("bench");
        nexus.cycle(&mut neuron, &lib, x, &neighbours);

        group.bench_with_input(BenchmarkId::new("step", n), &neighbours, |b, neighbours| {
            b.iter(|| nexus.step(black_box(&neuron), &lib, black_box(x), black_box(neighbours)));
        });
    }
    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.measurement_time(Duration::from_secs(5));

    for elements in [100usize, 1_000, 5_000] {
        let page = generate_page(elements, 42);
        let mut monitor = Monitor::new(PatternLibrary::default_priors(), NexusConfig::default());
        monitor.tick(&page);

        group.bench_with_input(BenchmarkId::new("page", elements), &page, |b, page| {
            b.iter(|| monitor.tick(black_box(page)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_cycle, bench_tick);
criterion_main!(benches);
