//! Headless skirmish between two squads.
//!
//! Archers fire projectiles on an absolute cooldown, projectiles land after
//! a flight time and may crit, medics spend mana to heal hurt allies in one
//! atomic transform, and fallen units leave a grave marker a second later
//! through a delayed effect.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=info cargo run -p tessera-engine --example skirmish
//! RUST_LOG=tessera_engine=debug cargo run -p tessera-engine --example skirmish
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Team {
    Red,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Role {
    Archer,
    Medic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Unit {
    team: Team,
    role: Role,
    life: u32,
    max: u32,
    mana: u32,
    ready_at: Deadline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Projectile {
    target: EntityId,
    damage: u32,
    lands_at: Deadline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Grave {
    team: Team,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Field {
    units: Store<Unit>,
    projectiles: Store<Projectile>,
    graves: Store<Grave>,
}

impl Entity<Field> for Unit {
    fn store(world: &Field) -> &Store<Self> {
        &world.units
    }
    fn store_mut(world: &mut Field) -> &mut Store<Self> {
        &mut world.units
    }
}

impl Entity<Field> for Projectile {
    fn store(world: &Field) -> &Store<Self> {
        &world.projectiles
    }
    fn store_mut(world: &mut Field) -> &mut Store<Self> {
        &mut world.projectiles
    }
}

impl Entity<Field> for Grave {
    fn store(world: &Field) -> &Store<Self> {
        &world.graves
    }
    fn store_mut(world: &mut Field) -> &mut Store<Self> {
        &mut world.graves
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Later {
    SpawnGrave(Team),
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Fired { by: EntityId, at: EntityId },
    Hit { target: EntityId, damage: u32, crit: bool },
    Healed { by: EntityId, target: EntityId },
    Fell(EntityId),
    GraveRaised(Team),
}

struct Skirmish;

impl Model for Skirmish {
    type World = Field;
    type Delayed = Later;
    type Effect = Event;

    fn materialize(delayed: &Later) -> Change<Self> {
        match *delayed {
            Later::SpawnGrave(team) => {
                Change::spawn::<Grave, _>(move |_, _| Grave { team }).then(Change::effect(Event::GraveRaised(team)))
            }
        }
    }
}

const ARCHER_COOLDOWN: Duration = Duration::from_millis(700);
const FLIGHT_TIME: Duration = Duration::from_millis(300);
const MEDIC_COOLDOWN: Duration = Duration::from_millis(900);
const GRAVE_DELAY: Duration = Duration::from_secs(1);
const HEAL_COST: u32 = 4;
const HEAL_AMOUNT: u32 = 6;

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Lowest-id living enemy.
fn pick_target(state: &State<Skirmish>, team: Team) -> Option<EntityId> {
    state
        .world()
        .units
        .iter()
        .find(|(_, u)| u.team != team && u.life > 0)
        .map(|(id, _)| id)
}

fn archer(state: &State<Skirmish>, id: EntityId, unit: &Unit) -> Change<Skirmish> {
    if unit.role != Role::Archer || unit.life == 0 || !unit.ready_at.passed(state.clock()) {
        return Change::Empty;
    }
    let Some(target) = pick_target(state, unit.team) else {
        return Change::Empty;
    };
    let ready_at = state.deadline_in(ARCHER_COOLDOWN);
    let lands_at = state.deadline_in(FLIGHT_TIME);

    Change::group([
        Change::update::<Unit, _>(id, move |_, u| Unit { ready_at, ..u.clone() }),
        Change::spawn::<Projectile, _>(move |_, _| Projectile {
            target,
            damage: 5,
            lands_at,
        }),
        Change::effect(Event::Fired { by: id, at: target }),
    ])
}

fn projectile(state: &State<Skirmish>, id: EntityId, shot: &Projectile) -> Change<Skirmish> {
    if !shot.lands_at.passed(state.clock()) {
        return Change::Empty;
    }
    let target = shot.target;
    let base = shot.damage;
    Change::remove::<Projectile>(id).then(Change::random(move |rng| {
        let crit = rng.gen_bool(0.2);
        let damage = if crit { base * 2 } else { base };
        Change::update::<Unit, _>(target, move |_, u| Unit {
            life: u.life.saturating_sub(damage),
            ..u.clone()
        })
        .then(Change::effect(Event::Hit { target, damage, crit }))
    }))
}

/// Spend mana and heal in one transform so concurrent medics never
/// double-spend or double-heal.
fn medic(state: &State<Skirmish>, id: EntityId, unit: &Unit) -> Change<Skirmish> {
    if unit.role != Role::Medic || unit.life == 0 || !unit.ready_at.passed(state.clock()) {
        return Change::Empty;
    }
    let hurt = state
        .world()
        .units
        .iter()
        .find(|(_, u)| u.team == unit.team && u.life > 0 && u.life < u.max)
        .map(|(ally, _)| ally);
    let Some(target) = hurt else {
        return Change::Empty;
    };
    let ready_at = state.deadline_in(MEDIC_COOLDOWN);

    Change::<Skirmish>::transform(move |s| {
        let units = &mut s.world_mut().units;
        let can_cast = units.get(id).is_some_and(|m| m.life > 0 && m.mana >= HEAL_COST);
        let still_hurt = units.get(target).is_some_and(|t| t.life > 0 && t.life < t.max);
        if !(can_cast && still_hurt) {
            return;
        }
        if let Some(m) = units.get_mut(id) {
            m.mana -= HEAL_COST;
            m.ready_at = ready_at;
        }
        if let Some(t) = units.get_mut(target) {
            t.life = (t.life + HEAL_AMOUNT).min(t.max);
        }
    })
    .then(Change::effect(Event::Healed { by: id, target }))
}

fn reaper(state: &State<Skirmish>) -> Change<Skirmish> {
    state
        .world()
        .units
        .iter()
        .filter(|(_, u)| u.life == 0)
        .map(|(id, u)| {
            Change::group([
                Change::remove::<Unit>(id),
                Change::effect(Event::Fell(id)),
                Change::defer(GRAVE_DELAY, Later::SpawnGrave(u.team)),
            ])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn squad(team: Team) -> [Unit; 3] {
    let archer = Unit {
        team,
        role: Role::Archer,
        life: 20,
        max: 20,
        mana: 0,
        ready_at: Deadline(Duration::ZERO),
    };
    let medic = Unit {
        role: Role::Medic,
        life: 14,
        max: 14,
        mana: 12,
        ..archer.clone()
    };
    [archer.clone(), medic, archer]
}

fn build(seed: u64) -> TickLoop<Skirmish> {
    let mut state = State::<Skirmish>::new(Field::default(), seed);
    for unit in squad(Team::Red).into_iter().chain(squad(Team::Blue)) {
        state.insert(unit);
    }

    let config = TickConfig {
        fixed_dt: Duration::from_millis(100),
        ..Default::default()
    };
    let mut tick_loop = TickLoop::new(state, config);
    tick_loop.add_producer("reaper", reaper);
    tick_loop.add_entity_producer::<Unit, _>("archers", archer);
    tick_loop.add_entity_producer::<Unit, _>("medics", medic);
    tick_loop.add_entity_producer::<Projectile, _>("projectiles", projectile);
    tick_loop
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut tick_loop = build(2024);
    let mut recorder = ReplayRecorder::new(tick_loop.capture_snapshot()?, 25);
    let mut log = TimedEffects::new();
    let mut total = ApplyReport::default();

    for _ in 0..300 {
        recorder.record_tick(tick_loop.tick_count(), Some(tick_loop.state_hash()?));
        total += tick_loop.tick_into(&mut log);
        if tick_loop.state().world().units.iter().all(|(_, u)| u.team == Team::Red)
            || tick_loop.state().world().units.iter().all(|(_, u)| u.team == Team::Blue)
        {
            break;
        }
    }

    for (clock, effects) in &log.ticks {
        for event in effects {
            info!(clock = ?clock, ?event, "event");
        }
    }

    let world = tick_loop.state().world();
    info!(
        ticks = tick_loop.tick_count(),
        clock = ?tick_loop.clock(),
        survivors = world.units.len(),
        graves = world.graves.len(),
        pending = tick_loop.state().pending().len(),
        "battle over"
    );
    info!(
        updates = total.updates,
        spawns = total.spawns,
        removals = total.removals,
        transforms = total.transforms,
        misses = total.identity_misses,
        randoms = total.randoms_resolved,
        share = total.transform_share(),
        "apply totals"
    );

    // Re-run the recording on a fresh loop to confirm it reproduces.
    let recording = recorder.finish();
    let result = replay(&mut build(0), &recording)?;
    anyhow::ensure!(
        result.first_divergence.is_none(),
        "replay diverged: {:?}",
        result.first_divergence
    );
    info!(ticks = result.ticks_replayed, hash = %tick_loop.state_hash()?, "replay reproduced the battle");

    Ok(())
}
