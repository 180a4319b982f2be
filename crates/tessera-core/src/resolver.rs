//! Flattening and execution of change trees against a state.
//!
//! [`apply`] walks a [`Change`] tree depth-first, left-to-right and folds
//! every atomic operation into the state as soon as it is reached:
//!
//! - a mutation runs against the current state, including everything the
//!   operations before it already did;
//! - an effect is appended to the emitted list and leaves the state alone;
//! - a deferral is inserted into the state's pending list;
//! - a randomized node consumes the state's seed at that moment, the seed
//!   is replaced by its successor, and the produced change is folded in
//!   place before the walk continues.
//!
//! The result depends on nothing but the starting state and the tree.
//!
//! # Example
//!
//! ```
//! use tessera_core::prelude::*;
//! # #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! # struct Unit { life: u32 }
//! # #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! # struct Arena { units: Store<Unit> }
//! # impl Entity<Arena> for Unit {
//! #     fn store(w: &Arena) -> &Store<Self> { &w.units }
//! #     fn store_mut(w: &mut Arena) -> &mut Store<Self> { &mut w.units }
//! # }
//! # struct Sim;
//! # impl Model for Sim {
//! #     type World = Arena;
//! #     type Delayed = ();
//! #     type Effect = &'static str;
//! #     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! # }
//! let mut state = State::<Sim>::new(Arena::default(), 7);
//! let unit = state.insert(Unit { life: 5 });
//!
//! let change = Change::group([
//!     Change::update::<Unit, _>(unit, |_, u| Unit { life: u.life + 3 }),
//!     Change::effect("healed"),
//! ]);
//!
//! let resolution = apply(&mut state, change);
//! assert_eq!(state.get::<Unit>(unit), Some(&Unit { life: 8 }));
//! assert_eq!(resolution.effects, vec!["healed"]);
//! assert_eq!(resolution.report.updates, 1);
//! ```

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::change::{Change, MutationKind, Outcome};
use crate::model::Model;
use crate::state::State;

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Counters describing what one application did.
///
/// `transforms` counts uses of the whole-state escape hatch. It is the
/// figure to watch as a performance budget, not a correctness signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Identity-targeted updates that found their entity.
    pub updates: usize,
    /// Entities created.
    pub spawns: usize,
    /// Entities removed.
    pub removals: usize,
    /// Whole-state transforms executed.
    pub transforms: usize,
    /// Identity-targeted mutations whose entity was already gone.
    pub identity_misses: usize,
    /// Side effects emitted.
    pub effects: usize,
    /// Delayed effects inserted into the pending list.
    pub deferred: usize,
    /// Randomized nodes resolved.
    pub randoms_resolved: usize,
    /// Due delayed effects turned back into changes this tick.
    pub delayed_materialized: usize,
}

impl ApplyReport {
    /// Mutations that ran, whether or not they hit their target.
    pub fn mutations(&self) -> usize {
        self.updates + self.spawns + self.removals + self.transforms + self.identity_misses
    }

    /// Fraction of executed mutations that were whole-state transforms.
    ///
    /// Zero when nothing ran.
    pub fn transform_share(&self) -> f64 {
        match self.mutations() {
            0 => 0.0,
            total => self.transforms as f64 / total as f64,
        }
    }

    fn record(&mut self, kind: MutationKind) {
        match kind {
            MutationKind::Update => self.updates += 1,
            MutationKind::Spawn => self.spawns += 1,
            MutationKind::Remove => self.removals += 1,
            MutationKind::Transform => self.transforms += 1,
        }
    }
}

impl AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.updates += rhs.updates;
        self.spawns += rhs.spawns;
        self.removals += rhs.removals;
        self.transforms += rhs.transforms;
        self.identity_misses += rhs.identity_misses;
        self.effects += rhs.effects;
        self.deferred += rhs.deferred;
        self.randoms_resolved += rhs.randoms_resolved;
        self.delayed_materialized += rhs.delayed_materialized;
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Output of [`apply`]: emitted side effects in order, plus the report.
pub struct Resolution<M: Model> {
    /// Side effects in emission order.
    pub effects: Vec<M::Effect>,
    /// What the application did.
    pub report: ApplyReport,
}

impl<M: Model> std::fmt::Debug for Resolution<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("effects", &self.effects)
            .field("report", &self.report)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Fold `change` into `state`, returning the emitted side effects.
pub fn apply<M: Model>(state: &mut State<M>, change: Change<M>) -> Resolution<M> {
    let mut effects = Vec::new();
    let mut report = ApplyReport::default();
    apply_into(state, change, &mut effects, &mut report);
    Resolution { effects, report }
}

/// By-value form of [`apply`]: `(State, Change) -> (State, effects)`.
pub fn resolve<M: Model>(mut state: State<M>, change: Change<M>) -> (State<M>, Vec<M::Effect>) {
    let Resolution { effects, .. } = apply(&mut state, change);
    (state, effects)
}

/// Fold `change` into `state`, appending to existing effect and report
/// accumulators.
pub fn apply_into<M: Model>(
    state: &mut State<M>,
    change: Change<M>,
    effects: &mut Vec<M::Effect>,
    report: &mut ApplyReport,
) {
    // Nodes still to fold; the next one is on top.
    let mut stack = vec![change];

    while let Some(node) = stack.pop() {
        match node {
            Change::Empty => {}
            Change::Group(children) => stack.extend(children.into_iter().rev()),
            Change::Mutate(mutation) => {
                let kind = mutation.kind();
                match mutation.run(state) {
                    Outcome::Applied => {
                        trace!(?kind, "mutation applied");
                        report.record(kind);
                    }
                    Outcome::Missed(id) => {
                        debug!(?kind, entity = %id, "target already gone, skipping");
                        report.identity_misses += 1;
                    }
                }
            }
            Change::Effect(effect) => {
                trace!(?effect, "effect emitted");
                effects.push(effect);
                report.effects += 1;
            }
            Change::DeferUntil(after, delayed) => {
                trace!(?after, ?delayed, "delayed effect scheduled");
                state.schedule(after, delayed);
                report.deferred += 1;
            }
            Change::Randomized(generator) => {
                let seed = state.seed();
                let (produced, next) = generator.resolve(seed);
                debug!(seed = seed.0, next = next.0, "randomized change resolved");
                state.set_seed(next);
                report.randoms_resolved += 1;
                // Folded next, ahead of the remaining siblings.
                stack.push(produced);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;

    use super::*;
    use crate::entity::{Entity, EntityId, Store};
    use crate::state::Seed;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tower {
        height: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Town {
        towers: Store<Tower>,
        log: Vec<String>,
    }

    impl Entity<Town> for Tower {
        fn store(world: &Town) -> &Store<Self> {
            &world.towers
        }
        fn store_mut(world: &mut Town) -> &mut Store<Self> {
            &mut world.towers
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Fx {
        Note(&'static str),
        SawSeed(Seed),
        Roll(u32),
    }

    struct TownModel;

    impl Model for TownModel {
        type World = Town;
        type Delayed = String;
        type Effect = Fx;

        fn materialize(delayed: &String) -> Change<Self> {
            let line = delayed.clone();
            Change::<TownModel>::transform(move |s| s.world_mut().log.push(line))
        }
    }

    type C = Change<TownModel>;

    fn town() -> (State<TownModel>, EntityId) {
        let mut state = State::<TownModel>::new(Town::default(), 1234);
        let id = state.insert(Tower { height: 1 });
        (state, id)
    }

    fn grow(id: EntityId) -> C {
        C::update::<Tower, _>(id, |_, t| Tower {
            height: t.height + 1,
        })
    }

    // -- 1. No-op laws ------------------------------------------------------

    #[test]
    fn empty_leaves_state_unchanged() {
        let (mut state, _) = town();
        let before = state.clone();
        let res = apply(&mut state, C::Empty);
        assert_eq!(state, before);
        assert!(res.effects.is_empty());
        assert_eq!(res.report, ApplyReport::default());
    }

    #[test]
    fn empty_group_is_empty() {
        let (mut state, _) = town();
        let before = state.clone();
        let res = apply(&mut state, C::group([]));
        assert_eq!(state, before);
        assert!(res.effects.is_empty());
    }

    // -- 2. Fold order ------------------------------------------------------

    #[test]
    fn later_mutations_see_earlier_ones() {
        let (mut state, id) = town();
        let change = C::group([
            grow(id),
            grow(id),
            C::update::<Tower, _>(id, |_, t| Tower {
                height: t.height * 10,
            }),
        ]);
        apply(&mut state, change);
        assert_eq!(state.get::<Tower>(id).unwrap().height, 30);
    }

    #[test]
    fn effects_keep_traversal_order() {
        let (mut state, _) = town();
        let change = C::group([
            C::effect(Fx::Note("a")),
            C::group([C::effect(Fx::Note("b")), C::effect(Fx::Note("c"))]),
            C::effect(Fx::Note("d")),
        ]);
        let res = apply(&mut state, change);
        assert_eq!(
            res.effects,
            vec![Fx::Note("a"), Fx::Note("b"), Fx::Note("c"), Fx::Note("d")]
        );
    }

    #[test]
    fn effects_do_not_touch_state() {
        let (mut state, _) = town();
        let before = state.clone();
        apply(&mut state, C::effect(Fx::Note("boom")));
        assert_eq!(state, before);
    }

    // -- 3. Identity misses -------------------------------------------------

    #[test]
    fn update_after_remove_is_silent_noop() {
        let (mut state, id) = town();
        let other = state.insert(Tower { height: 9 });

        let res = apply(
            &mut state,
            C::group([C::remove::<Tower>(id), grow(id), C::remove::<Tower>(id)]),
        );

        assert!(state.get::<Tower>(id).is_none());
        assert_eq!(state.get::<Tower>(other), Some(&Tower { height: 9 }));
        assert_eq!(res.report.removals, 1);
        assert_eq!(res.report.identity_misses, 2);
    }

    // -- 4. Spawning --------------------------------------------------------

    #[test]
    fn spawn_allocates_fresh_ids_in_order() {
        let (mut state, first) = town();
        apply(
            &mut state,
            C::group([
                C::spawn::<Tower, _>(|_, _| Tower { height: 2 }),
                C::spawn::<Tower, _>(|_, _| Tower { height: 3 }),
            ]),
        );
        let ids: Vec<u64> = state.world().towers.ids().map(EntityId::to_raw).collect();
        assert_eq!(ids, vec![first.to_raw(), 2, 3]);
        assert_eq!(state.next_id(), EntityId::from_raw(4));
    }

    // -- 5. Deferral --------------------------------------------------------

    #[test]
    fn defer_inserts_pending_relative_to_clock() {
        let (mut state, _) = town();
        state.advance_clock(Duration::from_millis(40));
        let res = apply(
            &mut state,
            C::defer(Duration::from_millis(60), "ring".to_owned()),
        );
        assert_eq!(res.report.deferred, 1);
        assert_eq!(state.pending().len(), 1);
        assert_eq!(state.pending()[0].due, Duration::from_millis(100));
        assert!(state.world().log.is_empty(), "deferred work must not run now");
    }

    // -- 6. Randomness ------------------------------------------------------

    fn saw_seed() -> C {
        C::randomized(|seed| {
            let mut rng = seed.rng();
            (C::effect(Fx::SawSeed(seed)), Seed::draw(&mut rng))
        })
    }

    #[test]
    fn randomized_nodes_consume_distinct_seeds() {
        let (mut state, _) = town();
        let start = state.seed();

        let res = apply(&mut state, C::group([saw_seed(), saw_seed()]));
        let seen: Vec<Seed> = res
            .effects
            .iter()
            .map(|fx| match fx {
                Fx::SawSeed(s) => *s,
                other => panic!("unexpected effect {other:?}"),
            })
            .collect();

        assert_eq!(seen[0], start);
        assert_ne!(seen[0], seen[1]);
        assert_ne!(state.seed(), seen[1]);
        assert_eq!(res.report.randoms_resolved, 2);
    }

    #[test]
    fn randomized_result_folds_before_next_sibling() {
        let (mut state, id) = town();
        let change = C::group([
            C::random(move |_| grow(id)),
            C::update::<Tower, _>(id, |_, t| Tower {
                height: t.height * 5,
            }),
        ]);
        apply(&mut state, change);
        assert_eq!(state.get::<Tower>(id).unwrap().height, 10);
    }

    #[test]
    fn nested_randomized_resolves_depth_first() {
        let (mut state, _) = town();
        let change = C::group([
            C::random(|_| C::group([saw_seed(), C::effect(Fx::Note("inner"))])),
            C::effect(Fx::Note("outer")),
        ]);
        let res = apply(&mut state, change);
        assert!(matches!(res.effects[0], Fx::SawSeed(_)));
        assert_eq!(res.effects[1..], [Fx::Note("inner"), Fx::Note("outer")]);
        assert_eq!(res.report.randoms_resolved, 2);
    }

    #[test]
    fn same_seed_same_rolls() {
        let roll = || {
            C::group(
                (0..4).map(|_| C::random(|rng| C::effect(Fx::Roll(rng.gen_range(1..=20))))),
            )
        };

        let (mut a, _) = town();
        let (mut b, _) = town();
        let ra = apply(&mut a, roll());
        let rb = apply(&mut b, roll());
        assert_eq!(ra.effects, rb.effects);
        assert_eq!(a, b);
    }

    // -- 7. Report ----------------------------------------------------------

    #[test]
    fn report_counts_by_kind_and_adds() {
        let (mut state, id) = town();
        let res = apply(
            &mut state,
            C::group([
                grow(id),
                C::transform(|_| {}),
                C::spawn::<Tower, _>(|_, _| Tower { height: 0 }),
                C::effect(Fx::Note("x")),
            ]),
        );
        assert_eq!(res.report.updates, 1);
        assert_eq!(res.report.transforms, 1);
        assert_eq!(res.report.spawns, 1);
        assert_eq!(res.report.effects, 1);
        assert_eq!(res.report.mutations(), 3);
        assert!((res.report.transform_share() - 1.0 / 3.0).abs() < 1e-12);

        let mut total = res.report;
        total += res.report;
        assert_eq!(total.updates, 2);
        assert_eq!(ApplyReport::default().transform_share(), 0.0);
    }

    #[test]
    fn resolve_is_by_value_apply() {
        let (state, id) = town();
        let (state, effects) = resolve(state, grow(id).then(C::effect(Fx::Note("done"))));
        assert_eq!(state.get::<Tower>(id).unwrap().height, 2);
        assert_eq!(effects, vec![Fx::Note("done")]);
    }
}
