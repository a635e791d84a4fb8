//! Stream cipher throughput benchmarks.
//!
//! Measures the cost of the position-indexed encipher/decipher loop across
//! the three supported round counts and a range of buffer sizes, so a
//! regression in the inner loop shows up before it reaches production
//! mount throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{thread_rng, Rng};

use safefs_cipher::rotor::generate_random_rotor;
use safefs_cipher::{encipher, Rounds};

fn bench_encipher_by_round_count(c: &mut Criterion) {
    let rotor = generate_random_rotor(&mut thread_rng());
    let offsets = [1, 2, 3, 4, 5, 6, 7, 8];

    let mut group = c.benchmark_group("encipher_rounds");
    for rounds in [Rounds::Three, Rounds::Five, Rounds::Eight] {
        let mut buf = vec![0u8; 64 * 1024];
        thread_rng().fill(buf.as_mut_slice());
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(rounds.count()),
            &rounds,
            |b, &rounds| {
                b.iter(|| {
                    encipher(&rotor, &offsets, 0, black_box(&mut buf.clone()), rounds);
                });
            },
        );
    }
    group.finish();
}

fn bench_encipher_by_buffer_size(c: &mut Criterion) {
    let rotor = generate_random_rotor(&mut thread_rng());
    let offsets = [1, 2, 3, 4, 5, 6, 7, 8];

    let mut group = c.benchmark_group("encipher_buffer_size");
    for size in [4 * 1024usize, 64 * 1024, 1024 * 1024] {
        let mut buf = vec![0u8; size];
        thread_rng().fill(buf.as_mut_slice());
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                encipher(&rotor, &offsets, 0, black_box(&mut buf.clone()), Rounds::Five);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encipher_by_round_count, bench_encipher_by_buffer_size);
criterion_main!(benches);
