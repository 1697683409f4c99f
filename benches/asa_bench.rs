//! Criterion benchmarks for the ASA optimizer.
//!
//! Uses synthetic problems (Sphere, Rosenbrock) to measure pure algorithm
//! overhead independent of any domain.

use asanneal::{AsaConfig, AsaProblem, AsaRunner, EvalPhase, GenerationMode, Parameter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ===========================================================================
// Sphere function: minimize sum(x_i^2)
// ===========================================================================

struct Sphere;

impl AsaProblem for Sphere {
    fn cost(&self, p: &[f64], _phase: EvalPhase) -> Option<f64> {
        Some(p.iter().map(|x| x * x).sum())
    }
}

// ===========================================================================
// Rosenbrock valley: narrow curved minimum, stresses reannealing
// ===========================================================================

struct Rosenbrock;

impl AsaProblem for Rosenbrock {
    fn cost(&self, p: &[f64], _phase: EvalPhase) -> Option<f64> {
        Some(
            p.windows(2)
                .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
                .sum(),
        )
    }
}

fn bounds(dim: usize) -> Vec<Parameter> {
    (0..dim).map(|_| Parameter::continuous(-5.0, 5.0)).collect()
}

fn bench_config() -> AsaConfig {
    AsaConfig::default()
        .with_limit_generated(2000)
        .with_limit_acceptances(0)
        .with_temperature_anneal_scale(1000.0)
        .with_seed(42)
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_asa_sphere(c: &mut Criterion) {
    let mut group = c.benchmark_group("asa_sphere");
    group.sample_size(10);

    for &dim in &[2, 8, 32] {
        let parameters = bounds(dim);
        let config = bench_config();
        group.bench_with_input(
            BenchmarkId::from_parameter(dim),
            &(parameters, config),
            |b, (params, config)| {
                b.iter(|| {
                    let result = AsaRunner::run(black_box(&Sphere), params, config);
                    black_box(result)
                })
            },
        );
    }
    group.finish();
}

fn bench_asa_rosenbrock(c: &mut Criterion) {
    let mut group = c.benchmark_group("asa_rosenbrock");
    group.sample_size(10);

    for &dim in &[2, 8] {
        let parameters = bounds(dim);
        let config = bench_config();
        group.bench_with_input(
            BenchmarkId::from_parameter(dim),
            &(parameters, config),
            |b, (params, config)| {
                b.iter(|| {
                    let result = AsaRunner::run(black_box(&Rosenbrock), params, config);
                    black_box(result)
                })
            },
        );
    }
    group.finish();
}

fn bench_asa_round_robin(c: &mut Criterion) {
    let mut group = c.benchmark_group("asa_sphere_round_robin");
    group.sample_size(10);

    for &dim in &[8, 32] {
        let parameters = bounds(dim);
        let config = bench_config().with_generation_mode(GenerationMode::RoundRobin);
        group.bench_with_input(
            BenchmarkId::from_parameter(dim),
            &(parameters, config),
            |b, (params, config)| {
                b.iter(|| {
                    let result = AsaRunner::run(black_box(&Sphere), params, config);
                    black_box(result)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_asa_sphere,
    bench_asa_rosenbrock,
    bench_asa_round_robin
);
criterion_main!(benches);
