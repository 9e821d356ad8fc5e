//! Microbenchmarks for the hot paths every worker iteration touches:
//! coverage map merge, weighted corpus pick, and ABI calldata encoding.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use primitive_types::{H160, H256, U256};

use medusa::corpus::chooser::WeightedChooser;
use medusa::coverage::{marker, CoverageMap};
use medusa::value::encode::encode_selector_and_args;
use medusa::value::AbiValue;

fn bench_coverage_merge(c: &mut Criterion) {
    let address = H160::repeat_byte(1);
    let code_hash = H256::repeat_byte(2);

    let mut base = CoverageMap::new();
    for pc in 0..2_000u32 {
        base.update_at(address, code_hash, marker::jump_edge(pc, pc + 1));
    }

    let mut incoming = CoverageMap::new();
    for pc in 1_000..3_000u32 {
        incoming.update_at(address, code_hash, marker::jump_edge(pc, pc + 1));
    }

    c.bench_function("coverage_map_merge_2k_overlap", |b| {
        b.iter(|| {
            let mut target = base.clone();
            black_box(target.update(&incoming));
        });
    });
}

fn bench_weighted_chooser(c: &mut Criterion) {
    let mut chooser = WeightedChooser::new();
    for id in 0..10_000u64 {
        chooser.insert(id, 1);
    }
    let mut rng = rand::thread_rng();

    c.bench_function("weighted_chooser_pick_10k", |b| {
        b.iter(|| black_box(chooser.pick(&mut rng)));
    });
}

fn bench_abi_encode(c: &mut Criterion) {
    let args = vec![
        AbiValue::Address(H160::repeat_byte(7)),
        AbiValue::Uint(U256::from(42u64), 256),
        AbiValue::Array(vec![
            AbiValue::Uint(U256::from(1u64), 256),
            AbiValue::Uint(U256::from(2u64), 256),
            AbiValue::Uint(U256::from(3u64), 256),
        ]),
    ];
    let selector = [0xde, 0xad, 0xbe, 0xef];

    c.bench_function("encode_selector_and_args_mixed", |b| {
        b.iter(|| black_box(encode_selector_and_args(selector, &args)));
    });
}

criterion_group!(benches, bench_coverage_merge, bench_weighted_chooser, bench_abi_encode);
criterion_main!(benches);
