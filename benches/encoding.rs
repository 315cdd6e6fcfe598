//! Benchmarks for slug generation, registry encoding and location reduction.
//!
//! Run with: `cargo bench --bench encoding`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Slug generation | <5µs | Per asset, fresh base |
//! | Slug collisions | Linear in collisions | Same title and id prefix |
//! | Bitmask encoding | <1µs | 64-registry table |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use heritage_publisher::pipeline::reduce_location;
use heritage_publisher::{RegistryTable, ResourceId, SlugGenerator};

/// Benchmark slug generation over distinct titles.
fn bench_slugs(c: &mut Criterion) {
    let mut group = c.benchmark_group("slugs");

    for count in [100, 1_000, 10_000] {
        let entries: Vec<(String, ResourceId)> = (0..count)
            .map(|i| (format!("Héritage Asset Nº {i}"), ResourceId::new(format!("{i:08x}-0000"))))
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("distinct", count), &entries, |b, entries| {
            b.iter(|| {
                let mut slugs = SlugGenerator::new();
                for (title, id) in entries {
                    black_box(slugs.to_slug(title, id, None).ok());
                }
                slugs.len()
            })
        });
    }

    group.finish();
}

/// Benchmark slug generation when every request collides.
fn bench_slug_collisions(c: &mut Criterion) {
    let id = ResourceId::new("abcdef-0000");
    c.bench_function("slug_collisions_100", |b| {
        b.iter(|| {
            let mut slugs = SlugGenerator::new();
            for _ in 0..100 {
                black_box(slugs.to_slug("Old Mill", &id, None).ok());
            }
        })
    });
}

/// Benchmark bitmask encoding against tables of increasing size.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [4, 16, 64] {
        let names: Vec<String> = (0..size).map(|i| format!("Registry {i}")).collect();
        let table = RegistryTable::from_names(&names);
        let query: Vec<&str> = names.iter().step_by(3).map(String::as_str).collect();

        group.bench_with_input(BenchmarkId::new("table", size), &query, |b, query| {
            b.iter(|| table.encode(black_box(query)))
        });
    }

    group.finish();
}

/// Benchmark polygon centroid reduction.
fn bench_reduce_location(c: &mut Criterion) {
    let ring: Vec<[f64; 2]> = (0..256)
        .map(|i| {
            let t = i as f64 / 256.0 * std::f64::consts::TAU;
            [t.cos(), t.sin()]
        })
        .collect();
    let location = json!({
        "type": "FeatureCollection",
        "features": [{"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [ring]}}]
    });

    c.bench_function("reduce_polygon_256", |b| {
        b.iter(|| reduce_location(black_box(&location)))
    });
}

criterion_group!(
    benches,
    bench_slugs,
    bench_slug_collisions,
    bench_encode,
    bench_reduce_location,
);

criterion_main!(benches);
