use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;
use spill_collections::external_map::{Aggregator, CombinerMap};
use spill_collections::percentile::PercentileHeap;
use std::collections::HashMap;

const NUM_OF_OPERATIONS: usize = 10_000;
const KEY_SPACE: u32 = 512;

struct SumAggregator;

impl Aggregator<u64, u64> for SumAggregator {
    fn create_combiner(&self, value: u64) -> u64 {
        value
    }

    fn merge_value(&self, combiner: u64, value: u64) -> u64 {
        combiner + value
    }

    fn merge_combiners(&self, lhs: u64, rhs: u64) -> u64 {
        lhs + rhs
    }
}

fn bench_combiner_map_insert(c: &mut Criterion) {
    c.bench_function("bench combiner map insert", |b| {
        b.iter(|| {
            let mut rng: rand::XorShiftRng = rand::SeedableRng::from_seed([1, 1, 1, 1]);
            let mut map = CombinerMap::new();
            for _ in 0..NUM_OF_OPERATIONS {
                let key = rng.gen::<u32>() % KEY_SPACE;
                let val = u64::from(rng.gen::<u32>());

                map.insert(&SumAggregator, key, val).unwrap();
            }
            black_box(map.len())
        })
    });
}

fn bench_hashmap_entry_fold(c: &mut Criterion) {
    c.bench_function("bench hashmap entry fold", |b| {
        b.iter(|| {
            let mut rng: rand::XorShiftRng = rand::SeedableRng::from_seed([1, 1, 1, 1]);
            let mut map = HashMap::new();
            for _ in 0..NUM_OF_OPERATIONS {
                let key = rng.gen::<u32>() % KEY_SPACE;
                let val = u64::from(rng.gen::<u32>());

                *map.entry(key).or_insert(0) += val;
            }
            black_box(map.len())
        })
    });
}

fn bench_percentile_insert(c: &mut Criterion) {
    c.bench_function("bench percentile insert", |b| {
        b.iter(|| {
            let mut rng: rand::XorShiftRng = rand::SeedableRng::from_seed([1, 1, 1, 1]);
            let mut heap = PercentileHeap::new(0.95);
            for _ in 0..NUM_OF_OPERATIONS {
                heap.insert(rng.gen::<f64>());
            }
            black_box(heap.percentile())
        })
    });
}

criterion_group!(
    benches,
    bench_combiner_map_insert,
    bench_hashmap_entry_fold,
    bench_percentile_insert
);
criterion_main!(benches);
