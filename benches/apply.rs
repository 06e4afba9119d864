//! Apply-kernel benchmarks.
//!
//! Measures conjunction and reduction over unions of random zones, the
//! workload dominating timed reachability runs.
//!
//! Run with:
//! ```bash
//! cargo bench --bench apply
//! ```

use cdd_rs::bounds::{bnd_lower, bnd_upper};
use cdd_rs::cdd::{Cdd, Op};
use cdd_rs::Ref;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn random_union(cdd: &mut Cdd, rng: &mut ChaCha8Rng, zones: usize) -> Ref {
    let clocks = cdd.clocks();
    let mut acc = Cdd::FALSE;
    for _ in 0..zones {
        let mut zone = Cdd::TRUE;
        for c in 1..clocks {
            let lo = rng.gen_range(0..50);
            let hi = lo + rng.gen_range(0..50);
            let iv = cdd.interval(c, 0, bnd_lower(lo, false), bnd_upper(hi, false));
            cdd.inc_ref(iv);
            let next = cdd.apply(zone, iv, Op::And);
            cdd.inc_ref(next);
            cdd.rec_deref(iv);
            if zone != Cdd::TRUE {
                cdd.rec_deref(zone);
            }
            zone = next;
        }
        let next = cdd.apply_or(acc, zone);
        cdd.inc_ref(next);
        cdd.rec_deref(zone);
        if acc != Cdd::FALSE {
            cdd.rec_deref(acc);
        }
        acc = next;
    }
    acc
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    for &zones in &[4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("and_union", zones), &zones, |b, &zones| {
            let mut cdd = Cdd::default();
            cdd.add_clocks(4);
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            let x = random_union(&mut cdd, &mut rng, zones);
            let y = random_union(&mut cdd, &mut rng, zones);
            b.iter(|| cdd.apply(x, y, Op::And));
        });
    }
    group.finish();
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    for &zones in &[4usize, 16] {
        group.bench_with_input(BenchmarkId::new("reduce_union", zones), &zones, |b, &zones| {
            let mut cdd = Cdd::default();
            cdd.add_clocks(4);
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            let x = random_union(&mut cdd, &mut rng, zones);
            let y = random_union(&mut cdd, &mut rng, zones);
            let both = cdd.apply(x, y, Op::And);
            cdd.inc_ref(both);
            b.iter(|| cdd.reduce(both));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_apply, bench_reduce);
criterion_main!(benches);
