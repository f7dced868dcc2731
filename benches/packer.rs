//! Benchmarks for the tetromino packer.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_pcg::Pcg32;

use tetropack::geometry::all_orientations;
use tetropack::{DualPacker, Packer, ShapeCounts, ShapeKind};

const SHEET: &str = "\
.......#
........
...#....
#.......
........
....#...
";

/// Benchmark a single-grid fill with a mixed shape request.
fn bench_fill(c: &mut Criterion) {
    let counts: ShapeCounts = "T:3, L:2, J:2, O:2, I:1, S:1".parse().unwrap();

    c.bench_function("fill_mixed", |b| {
        b.iter(|| {
            let mut packer = Packer::parse(SHEET).unwrap();
            black_box(packer.fill(black_box(&counts)).unwrap())
        })
    });
}

/// Benchmark covering both faces of a blank sheet with any shapes.
fn bench_dual_fill(c: &mut Criterion) {
    let blank = "......\n......\n......\n......";
    let mut group = c.benchmark_group("dual");
    group.sample_size(20);
    group.bench_function("fill_6x4", |b| {
        b.iter(|| {
            let mut packer = DualPacker::parse_faces(blank, blank).unwrap();
            black_box(packer.fill(None).unwrap())
        })
    });
    group.finish();
}

/// Benchmark slot maps and coverage for every shape.
fn bench_slot_coverage(c: &mut Criterion) {
    let packer = Packer::parse(SHEET).unwrap();

    c.bench_function("slot_coverage", |b| {
        b.iter(|| {
            let slots = packer.find_slots().unwrap();
            black_box(packer.slot_coverage(&slots).unwrap())
        })
    });
}

/// Benchmark the greedy pass used by mutation.
fn bench_random_fill(c: &mut Criterion) {
    let counts: ShapeCounts = "T:3, L:2, J:2, O:2, I:1, S:1".parse().unwrap();

    c.bench_function("random_fill", |b| {
        let mut rng = Pcg32::seed_from_u64(1);
        b.iter(|| {
            let mut packer = Packer::parse(SHEET).unwrap();
            let mut remaining = counts.clone();
            black_box(packer.random_fill(&mut remaining, &mut rng).unwrap())
        })
    });
}

/// Benchmark computing the orientations of a reference shape.
fn bench_orientations(c: &mut Criterion) {
    let cells: Vec<(i32, i32)> = ShapeKind::T.shapes().next().map(|s| s.cells().to_vec()).unwrap();

    c.bench_function("all_orientations", |b| {
        b.iter(|| all_orientations(black_box(&cells)))
    });
}

criterion_group!(
    benches,
    bench_fill,
    bench_dual_fill,
    bench_slot_coverage,
    bench_random_fill,
    bench_orientations
);
criterion_main!(benches);
