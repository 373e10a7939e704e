use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use plc_link::core::memory::MemoryBank;

#[allow(clippy::unwrap_used)]
fn bench_memory_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_access");
    let block_sizes = [16usize, 256, 4096, 65536];

    for &size in &block_sizes {
        let bank = MemoryBank::new(65536);
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("set_bytes_{size}b"), |b| {
            b.iter_batched(
                || data.clone(),
                |data| {
                    bank.set_bytes(0, &data);
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("get_bytes_{size}b"), |b| {
            b.iter(|| {
                let out = bank.get_bytes(0, size);
                assert_eq!(out.len(), size);
            })
        });
    }

    group.finish();
}

fn bench_bit_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_access");
    let bank = MemoryBank::new(65536);

    group.bench_function("set_bit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            bank.set_bit(i % (65536 * 8), true);
            i += 1;
        })
    });
    group.bench_function("get_bit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let _ = bank.get_bit(i % (65536 * 8));
            i += 1;
        })
    });
    group.bench_function("get_bits_64", |b| {
        b.iter(|| {
            let bits = bank.get_bits(1000, 64);
            assert_eq!(bits.len(), 64);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_memory_access, bench_bit_access);
criterion_main!(benches);
