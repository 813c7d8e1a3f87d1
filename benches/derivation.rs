use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fairplay::fairness::{bounded_ints, derive_for, Draw, SeedPair};
use fairplay::games::crash::crash_point_for;
use fairplay::games::tiles::{derive_trap_layout, LayoutConfig, TowerDifficulty};

fn seed() -> SeedPair {
    SeedPair::from_parts("7c".repeat(32), "bench-client", 1).unwrap()
}

fn bench_derivation(c: &mut Criterion) {
    let seed = seed();

    c.bench_function("hmac_digest", |b| b.iter(|| derive_for(black_box(&seed), None)));

    c.bench_function("crash_point", |b| b.iter(|| crash_point_for(black_box(&seed)).unwrap()));

    // 24 distinct values forces re-derivation rounds
    c.bench_function("distinct_24_of_25", |b| {
        b.iter(|| bounded_ints(black_box(&seed), None, Draw::distinct(24, 25, 2)).unwrap())
    });

    let towers = LayoutConfig::towers(TowerDifficulty::Master, 0.01).unwrap();
    c.bench_function("towers_master_layout", |b| {
        b.iter(|| derive_trap_layout(black_box(&seed), &towers).unwrap())
    });
}

criterion_group!(benches, bench_derivation);
criterion_main!(benches);
