//! # Codec Benchmark
//!
//! Measures the per-tick serialization work of a server:
//! - Snapshot of N entities, encoded and decoded
//! - Per-player visibility filtering
//! - Input package assembly
//!
//! Run with: `cargo bench --package tidenet_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tidenet_core::{
    EntityOptions, EntityRegistry, Input, InputPackager, NetworkedEntity, PlayerId, PlayersMask,
    Snapshot, SyncFloat, SyncInt, SyncVar, SyncVec3,
};
use tidenet_shared::Vec3;

struct Ship {
    position: SyncVec3,
    heading: SyncFloat,
    hull: SyncInt,
}

impl Ship {
    #[allow(clippy::cast_precision_loss)]
    fn new(seed: i32) -> Self {
        let f = seed as f32;
        Self {
            position: SyncVec3::new(Vec3::new(f, f * 0.5, -f)),
            heading: SyncFloat::new(f * 0.1),
            hull: SyncInt::new(100),
        }
    }
}

impl NetworkedEntity for Ship {
    fn fields(&self) -> Vec<&dyn SyncVar> {
        vec![&self.position, &self.heading, &self.hull]
    }
    fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
        vec![&mut self.position, &mut self.heading, &mut self.hull]
    }
}

fn populated(count: i32) -> EntityRegistry {
    let mut registry = EntityRegistry::new(PlayerId::WORLD);
    for id in 0..count {
        let options = EntityOptions::default().visible_to(if id % 2 == 0 {
            PlayersMask::ALL
        } else {
            PlayersMask::single(PlayerId(id % 4))
        });
        let _ = registry.add(id, options, Box::new(Ship::new(id)));
    }
    registry
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for count in [64, 256, 1024] {
        let mut registry = populated(count);
        group.bench_with_input(BenchmarkId::new("collect_encode", count), &count, |b, _| {
            b.iter(|| black_box(registry.get_snapshot(None).encode()));
        });

        let bytes = registry.get_snapshot(None).encode();
        group.bench_with_input(BenchmarkId::new("decode", count), &bytes, |b, bytes| {
            b.iter(|| black_box(Snapshot::decode(bytes)));
        });
    }
    group.finish();
}

fn bench_visibility_fanout(c: &mut Criterion) {
    let mut registry = populated(512);
    let players = [PlayerId(0), PlayerId(1), PlayerId(2), PlayerId(3)];
    c.bench_function("fanout_4_players_512_entities", |b| {
        b.iter(|| black_box(registry.get_snapshots(&players)));
    });
}

fn bench_input_package(c: &mut Criterion) {
    let mut packager = InputPackager::new(17);
    let mut tick = 0;
    c.bench_function("input_package_17", |b| {
        b.iter(|| {
            tick += 1;
            let input = Input {
                tick,
                player: PlayerId(0),
                entries: vec![(1, vec![0; 12])],
            };
            black_box(packager.push(&input))
        });
    });
}

criterion_group!(benches, bench_snapshot, bench_visibility_fanout, bench_input_package);
criterion_main!(benches);
