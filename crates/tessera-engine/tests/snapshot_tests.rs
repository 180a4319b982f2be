//! Integration tests for engine snapshots: restore determinism, branching,
//! pending delayed effects across serialization, and the state kept after a
//! tick aborted by a panicking producer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use rand::Rng;
use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Hive {
    honey: u32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Meadow {
    hives: Store<Hive>,
    harvests: u32,
    fuse: Option<u32>,
}

impl Entity<Meadow> for Hive {
    fn store(world: &Meadow) -> &Store<Self> {
        &world.hives
    }
    fn store_mut(world: &mut Meadow) -> &mut Store<Self> {
        &mut world.hives
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
enum Chore {
    Harvest(EntityId),
}

struct Beekeeping;

impl Model for Beekeeping {
    type World = Meadow;
    type Delayed = Chore;
    type Effect = (EntityId, u32);

    fn materialize(delayed: &Chore) -> Change<Self> {
        let Chore::Harvest(id) = *delayed;
        Change::<Beekeeping>::transform(move |s| {
            let world = s.world_mut();
            if let Some(hive) = world.hives.get_mut(id) {
                hive.honey = 0;
                world.harvests += 1;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn add_producers(tick_loop: &mut TickLoop<Beekeeping>) {
    tick_loop.add_entity_producer::<Hive, _>("forage", |_, id, _| {
        Change::random(move |rng| {
            let gathered = rng.gen_range(1..=3);
            Change::update::<Hive, _>(id, move |_, h| Hive {
                honey: h.honey + gathered,
            })
            .then(Change::effect((id, gathered)))
        })
    });
    tick_loop.add_entity_producer::<Hive, _>("schedule-harvest", |_, id, hive| {
        if hive.honey >= 10 && hive.honey < 13 {
            Change::defer(Duration::from_millis(250), Chore::Harvest(id))
        } else {
            Change::Empty
        }
    });
    tick_loop.add_producer("fuse", |s| match s.world().fuse {
        Some(at) => Change::<Beekeeping>::transform(move |s| {
            s.world_mut().harvests += 1000;
            assert!(s.clock() < Duration::from_millis(u64::from(at)), "fuse blew at {at}ms");
        }),
        None => Change::Empty,
    });
}

fn build(seed: u64) -> TickLoop<Beekeeping> {
    let mut state = State::<Beekeeping>::new(Meadow::default(), seed);
    for honey in [0, 4, 8] {
        state.insert(Hive { honey });
    }
    let config = TickConfig {
        fixed_dt: Duration::from_millis(50),
        ..Default::default()
    };
    let mut tick_loop = TickLoop::new(state, config);
    add_producers(&mut tick_loop);
    tick_loop
}

fn run_collecting(tick_loop: &mut TickLoop<Beekeeping>, ticks: u64) -> Vec<(EntityId, u32)> {
    let mut effects = Vec::new();
    tick_loop.run_ticks_into(ticks, &mut effects);
    effects
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn snapshot_restore_determinism() {
    let mut tick_loop = build(5);
    tick_loop.run_ticks(20);
    let snapshot = tick_loop.capture_snapshot().unwrap();

    let effects_a = run_collecting(&mut tick_loop, 30);
    let hash_a = tick_loop.state_hash().unwrap();

    tick_loop.restore_from_snapshot(&snapshot).unwrap();
    let effects_b = run_collecting(&mut tick_loop, 30);
    let hash_b = tick_loop.state_hash().unwrap();

    assert_eq!(effects_a, effects_b);
    assert_eq!(hash_a, hash_b);
}

#[test]
fn snapshot_branching_produces_different_states() {
    let mut tick_loop = build(5);
    tick_loop.run_ticks(10);
    let snapshot = tick_loop.capture_snapshot().unwrap();

    tick_loop.run_ticks(10);
    let hash_plain = tick_loop.state_hash().unwrap();

    tick_loop.restore_from_snapshot(&snapshot).unwrap();
    tick_loop.state_mut().insert(Hive { honey: 0 });
    tick_loop.run_ticks(10);
    let hash_branched = tick_loop.state_hash().unwrap();

    assert_ne!(hash_plain, hash_branched);
    assert_eq!(tick_loop.state().world().hives.len(), 4);
}

#[test]
fn restore_resets_tick_counter_and_clock() {
    let mut tick_loop = build(1);
    tick_loop.run_ticks(7);
    let snapshot = tick_loop.capture_snapshot().unwrap();
    tick_loop.run_ticks(13);
    assert_eq!(tick_loop.tick_count(), 20);

    tick_loop.restore_from_snapshot(&snapshot).unwrap();
    assert_eq!(tick_loop.tick_count(), 7);
    assert_eq!(tick_loop.clock(), Duration::from_millis(350));
}

#[test]
fn state_hash_matches_snapshot_hash() {
    let mut tick_loop = build(3);
    tick_loop.run_ticks(4);
    let snapshot = tick_loop.capture_snapshot().unwrap();
    assert_eq!(tick_loop.state_hash().unwrap(), snapshot.hash);
    assert!(snapshot.hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn seed_is_part_of_the_hash() {
    let a = build(1).capture_snapshot().unwrap();
    let b = build(2).capture_snapshot().unwrap();
    assert_eq!(a.state.world(), b.state.world());
    assert_ne!(a.hash, b.hash);
}

#[test]
fn pending_harvest_survives_json_into_fresh_loop() {
    let mut tick_loop = build(8);
    while tick_loop.state().pending().is_empty() {
        tick_loop.tick();
    }
    let snapshot = tick_loop.capture_snapshot().unwrap();
    let json = serde_json::to_string_pretty(&snapshot).unwrap();

    // Original keeps running.
    tick_loop.run_ticks(10);
    let expected = tick_loop.state_hash().unwrap();

    // A fresh loop with the same producers resumes from the JSON.
    let restored: EngineSnapshot<Beekeeping> = serde_json::from_str(&json).unwrap();
    assert!(!restored.state.pending().is_empty());
    let mut resumed = build(999);
    resumed.restore_from_snapshot(&restored).unwrap();
    resumed.run_ticks(10);

    assert_eq!(resumed.state_hash().unwrap(), expected);
    assert!(resumed.state().world().harvests >= 1);
}

#[test]
fn panicking_tick_keeps_last_good_state() {
    let mut tick_loop = build(4);
    tick_loop.state_mut().world_mut().fuse = Some(200);
    tick_loop.run_ticks(4); // clocks 0, 50, 100, 150
    tick_loop
        .state_mut()
        .schedule(Duration::ZERO, Chore::Harvest(EntityId::from_raw(1)));
    let before = tick_loop.state().clone();
    let hash_before = tick_loop.state_hash().unwrap();

    let aborted = catch_unwind(AssertUnwindSafe(|| tick_loop.tick())); // clock 200
    assert!(aborted.is_err());
    assert_eq!(tick_loop.state(), &before);
    assert_eq!(tick_loop.state_hash().unwrap(), hash_before);
    assert_eq!(tick_loop.state().pending(), before.pending());
    assert_eq!(tick_loop.tick_count(), 4);

    // Disarmed, the same tick runs and the kept harvest fires.
    tick_loop.state_mut().world_mut().fuse = None;
    tick_loop.tick();
    let world = tick_loop.state().world();
    assert_eq!(world.harvests, before.world().harvests + 1);
    assert_eq!(world.hives.get(EntityId::from_raw(1)).map(|h| h.honey), Some(0));
    assert_eq!(tick_loop.tick_count(), 5);
}
