//! Resolver throughput benchmark.
//!
//! Compares identity-targeted updates against the same work expressed as
//! whole-state transforms, at several entity counts. The gap is the cost of
//! reaching for the escape hatch.
//!
//! Run with: `cargo bench --bench resolver_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_core::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Mote {
    x: f64,
    dx: f64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Field {
    motes: Store<Mote>,
}

impl Entity<Field> for Mote {
    fn store(world: &Field) -> &Store<Self> {
        &world.motes
    }
    fn store_mut(world: &mut Field) -> &mut Store<Self> {
        &mut world.motes
    }
}

struct Drift;

impl Model for Drift {
    type World = Field;
    type Delayed = ();
    type Effect = ();

    fn materialize(_: &()) -> Change<Self> {
        Change::Empty
    }
}

fn setup(count: usize) -> State<Drift> {
    let mut state = State::<Drift>::new(Field::default(), 0);
    for i in 0..count {
        state.insert(Mote {
            x: i as f64,
            dx: 0.5,
        });
    }
    state
}

fn targeted(state: &State<Drift>) -> Change<Drift> {
    state
        .world()
        .motes
        .ids()
        .map(|id| {
            Change::update::<Mote, _>(id, |_, m| Mote {
                x: m.x + m.dx,
                dx: m.dx,
            })
        })
        .collect()
}

fn transforms(state: &State<Drift>) -> Change<Drift> {
    state
        .world()
        .motes
        .ids()
        .map(|id| {
            Change::<Drift>::transform(move |s| {
                if let Some(m) = s.world_mut().motes.get_mut(id) {
                    m.x += m.dx;
                }
            })
        })
        .collect()
}

fn bench_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver");
    for count in [100usize, 1_000, 10_000] {
        let base = setup(count);

        group.bench_with_input(BenchmarkId::new("targeted_updates", count), &base, |b, base| {
            b.iter_batched(
                || (base.clone(), targeted(base)),
                |(mut state, change)| black_box(apply(&mut state, change)),
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("transforms", count), &base, |b, base| {
            b.iter_batched(
                || (base.clone(), transforms(base)),
                |(mut state, change)| black_box(apply(&mut state, change)),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolver);
criterion_main!(benches);
