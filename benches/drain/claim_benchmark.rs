use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drainx::{Drain, LoadFailure};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::sync::Arc;

const NUM_CLAIMS: usize = 100_000;

// ========== 辅助函数 ==========

#[derive(Debug)]
struct BenchConfig {
    generation: u64,
    payload: Vec<u8>,
}

fn new_drain() -> Drain<BenchConfig> {
    Drain::new(
        |current: Option<&BenchConfig>| -> Result<BenchConfig, LoadFailure<BenchConfig>> {
            Ok(BenchConfig {
                generation: current.map_or(0, |c| c.generation + 1),
                payload: vec![0u8; 1024],
            })
        },
        |_closing: Option<&BenchConfig>, _current: Option<&BenchConfig>| {},
    )
    .unwrap()
}

// ========== 1. 单线程 claim/release ==========

fn benchmark_claim_release(c: &mut Criterion) {
    let drain = new_drain();

    c.bench_function("claim_release", |b| {
        b.iter(|| {
            let claim = drain.claim().unwrap();
            black_box(claim.config().map(|c| c.payload.len()));
            drain.release(claim);
        })
    });
}

// ========== 2. 单线程 read ==========

fn benchmark_read(c: &mut Criterion) {
    let drain = new_drain();

    c.bench_function("read", |b| {
        b.iter(|| black_box(drain.read(|c| c.generation).unwrap()))
    });
}

// ========== 3. 多线程并发 claim/release ==========

fn benchmark_concurrent_claim_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_claim_release");
    let num_threads = num_cpus::get();
    let drain = Arc::new(new_drain());

    group.bench_with_input(
        BenchmarkId::from_parameter(num_threads),
        &num_threads,
        |b, _| {
            b.iter(|| {
                (0..NUM_CLAIMS).into_par_iter().for_each(|_| {
                    let claim = drain.claim().unwrap();
                    black_box(claim.version());
                    drain.release(claim);
                });
            })
        },
    );

    group.finish();
}

// ========== 4. 并发 claim/release 与 reload 交错 ==========

fn benchmark_claim_during_reload(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_during_reload");
    let drain = Arc::new(new_drain());

    for reload_every in [1_000usize, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(reload_every),
            &reload_every,
            |b, reload_every| {
                b.iter(|| {
                    (0..NUM_CLAIMS).into_par_iter().for_each(|i| {
                        if i % reload_every == 0 {
                            drain.reload().unwrap();
                        }
                        let claim = drain.claim().unwrap();
                        black_box(claim.config().map(|c| c.generation));
                        drain.release(claim);
                    });
                })
            },
        );
    }

    group.finish();
}

// ========== 主函数 ==========

criterion_group!(
    benches,
    benchmark_claim_release,
    benchmark_read,
    benchmark_concurrent_claim_release,
    benchmark_claim_during_reload
);
criterion_main!(benches);
