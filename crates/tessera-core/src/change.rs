//! Change values: proposals of state mutations and effects.
//!
//! A [`Change`] describes intent. It never holds a reference to an entity
//! snapshot, because a sibling change earlier in the same batch may already
//! have modified or removed that entity by the time this one runs. Instead,
//! identity-targeted helpers look the entity up when they are applied.
//!
//! Changes compose into trees with [`Change::Group`]; the resolver walks the
//! tree depth-first, left-to-right (see [`crate::resolver`]).
//!
//! # Atomicity
//!
//! Each [`Mutation`] runs to completion before the next one starts. Two
//! correlated writes that must not be interleaved with other proposals (for
//! example "spend mana, then heal") belong in a single mutation, not in two
//! sibling changes:
//!
//! ```
//! use tessera_core::prelude::*;
//! # #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! # struct Unit { life: u32, mana: u32 }
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
//! #     type Effect = ();
//! #     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! # }
//! let mut state = State::<Sim>::new(Arena::default(), 0);
//! let healer = state.insert(Unit { life: 10, mana: 5 });
//! let target = state.insert(Unit { life: 2, mana: 0 });
//!
//! let cast = Change::<Sim>::transform(move |state| {
//!     let units = &mut state.world_mut().units;
//!     let Some(caster) = units.get_mut(healer) else { return };
//!     if caster.mana < 5 {
//!         return;
//!     }
//!     caster.mana -= 5;
//!     if let Some(patient) = units.get_mut(target) {
//!         patient.life += 4;
//!     }
//! });
//!
//! apply(&mut state, cast);
//! assert_eq!(state.get::<Unit>(target).unwrap().life, 6);
//! ```

use std::fmt;
use std::time::Duration;

use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};
use crate::model::Model;
use crate::state::{Seed, State};

// ---------------------------------------------------------------------------
// MutationKind / Outcome
// ---------------------------------------------------------------------------

/// What a [`Mutation`] does, for accounting in the apply report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    /// Rewrites one entity found by identity.
    Update,
    /// Allocates an identity and inserts a new entity.
    Spawn,
    /// Removes one entity by identity.
    Remove,
    /// Arbitrary whole-state transform (the escape hatch).
    Transform,
}

/// Result of running one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The state was rewritten.
    Applied,
    /// The targeted identity no longer exists; the state is untouched.
    Missed(EntityId),
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

type MutateFn<M> = Box<dyn FnOnce(&mut State<M>) -> Outcome + Send>;

/// A state transform executed during the fold.
///
/// The closure receives exclusive access to the state for exactly the
/// duration of one step and never outlives it.
pub struct Mutation<M: Model> {
    kind: MutationKind,
    run: MutateFn<M>,
}

impl<M: Model> Mutation<M> {
    /// Wrap a raw transform. Most code should use the [`Change`] helpers.
    pub fn new<F>(kind: MutationKind, run: F) -> Self
    where
        F: FnOnce(&mut State<M>) -> Outcome + Send + 'static,
    {
        Self {
            kind,
            run: Box::new(run),
        }
    }

    /// What kind of mutation this is.
    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Run against `state`.
    pub fn run(self, state: &mut State<M>) -> Outcome {
        (self.run)(state)
    }
}

impl<M: Model> fmt::Debug for Mutation<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mutation").field(&self.kind).finish()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

type GenerateFn<M> = Box<dyn FnOnce(Seed) -> (Change<M>, Seed) + Send>;

/// Seed-consuming producer of a change, resolved during the fold.
pub struct Generator<M: Model> {
    run: GenerateFn<M>,
}

impl<M: Model> Generator<M> {
    /// Wrap a raw `Seed -> (Change, Seed)` function.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(Seed) -> (Change<M>, Seed) + Send + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// Consume `seed`, yielding the concrete change and the successor seed.
    pub fn resolve(self, seed: Seed) -> (Change<M>, Seed) {
        (self.run)(seed)
    }
}

impl<M: Model> fmt::Debug for Generator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Generator")
    }
}

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// A proposed modification of the state.
pub enum Change<M: Model> {
    /// No effect.
    Empty,
    /// Ordered composition, flattened depth-first, left-to-right.
    Group(Vec<Change<M>>),
    /// State transform.
    Mutate(Mutation<M>),
    /// Side effect handed to the sink after the tick; never touches state.
    Effect(M::Effect),
    /// Delayed effect, due `Duration` after the clock at application time.
    DeferUntil(Duration, M::Delayed),
    /// Change that depends on the state's random seed.
    Randomized(Generator<M>),
}

impl<M: Model> Change<M> {
    /// Compose changes in order.
    pub fn group<I>(changes: I) -> Self
    where
        I: IntoIterator<Item = Change<M>>,
    {
        Change::Group(changes.into_iter().collect())
    }

    /// Append `next` after `self`.
    pub fn then(self, next: Change<M>) -> Self {
        match (self, next) {
            (Change::Empty, next) => next,
            (this, Change::Empty) => this,
            (Change::Group(mut changes), next) => {
                changes.push(next);
                Change::Group(changes)
            }
            (this, next) => Change::Group(vec![this, next]),
        }
    }

    /// Rewrite the entity `id` of kind `E`.
    ///
    /// When applied, the entity is looked up in the *current* state. If it
    /// is gone the change does nothing. Otherwise `f` receives the current
    /// state and the currently stored entity, and its result is written back
    /// under the same id.
    pub fn update<E, F>(id: EntityId, f: F) -> Self
    where
        E: Entity<M::World>,
        F: FnOnce(&State<M>, &E) -> E + Send + 'static,
    {
        Change::Mutate(Mutation::new(MutationKind::Update, move |state| {
            let next = {
                let current: &State<M> = &*state;
                let Some(entity) = E::store(current.world()).get(id) else {
                    return Outcome::Missed(id);
                };
                f(current, entity)
            };
            E::store_mut(state.world_mut()).insert(id, next);
            Outcome::Applied
        }))
    }

    /// Create an entity of kind `E` under a freshly allocated id.
    pub fn spawn<E, F>(f: F) -> Self
    where
        E: Entity<M::World>,
        F: FnOnce(&State<M>, EntityId) -> E + Send + 'static,
    {
        Change::Mutate(Mutation::new(MutationKind::Spawn, move |state| {
            let id = state.allocate_id();
            let entity = f(state, id);
            E::store_mut(state.world_mut()).insert(id, entity);
            Outcome::Applied
        }))
    }

    /// Remove the entity `id` of kind `E`, if it still exists.
    pub fn remove<E>(id: EntityId) -> Self
    where
        E: Entity<M::World>,
    {
        Change::Mutate(Mutation::new(MutationKind::Remove, move |state| {
            match E::store_mut(state.world_mut()).remove(id) {
                Some(_) => Outcome::Applied,
                None => Outcome::Missed(id),
            }
        }))
    }

    /// Arbitrary whole-state transform.
    ///
    /// Needed for heterogeneous multi-entity operations, and the only way
    /// to make several correlated writes atomic. It is also the most
    /// expensive kind of change, so the apply report counts its uses.
    ///
    /// The closure body is checked before the model is inferred, so callers
    /// touching world fields name the model: `Change::<Sim>::transform(..)`.
    pub fn transform<F>(f: F) -> Self
    where
        F: FnOnce(&mut State<M>) + Send + 'static,
    {
        Change::Mutate(Mutation::new(MutationKind::Transform, move |state| {
            f(state);
            Outcome::Applied
        }))
    }

    /// Emit a side effect.
    pub fn effect(effect: M::Effect) -> Self {
        Change::Effect(effect)
    }

    /// Schedule `delayed` to fall due `after` from the clock at apply time.
    pub fn defer(after: Duration, delayed: M::Delayed) -> Self {
        Change::DeferUntil(after, delayed)
    }

    /// Build a change from the state's random stream.
    ///
    /// `f` draws from a [`Pcg32`] positioned at the current seed; the
    /// successor seed is drawn after `f` returns.
    pub fn random<F>(f: F) -> Self
    where
        F: FnOnce(&mut Pcg32) -> Change<M> + Send + 'static,
    {
        Change::randomized(move |seed: Seed| {
            let mut rng = seed.rng();
            let change = f(&mut rng);
            (change, Seed::draw(&mut rng))
        })
    }

    /// Raw `Seed -> (Change, Seed)` form of [`Change::random`].
    pub fn randomized<F>(f: F) -> Self
    where
        F: FnOnce(Seed) -> (Change<M>, Seed) + Send + 'static,
    {
        Change::Randomized(Generator::new(f))
    }

    /// Whether the tree contains no operation at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Change::Empty => true,
            Change::Group(changes) => changes.iter().all(Change::is_empty),
            _ => false,
        }
    }

    /// Flatten into the ordered list of atomic operations.
    ///
    /// Groups are inlined and `Empty` nodes dropped. Randomized nodes stay
    /// unresolved as [`Op::Random`]: their output depends on the seed at
    /// the moment they are reached in the fold.
    pub fn flatten(self) -> Vec<Op<M>> {
        let mut ops = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Change::Empty => {}
                Change::Group(children) => stack.extend(children.into_iter().rev()),
                Change::Mutate(m) => ops.push(Op::Mutate(m)),
                Change::Effect(e) => ops.push(Op::Effect(e)),
                Change::DeferUntil(after, d) => ops.push(Op::Defer(after, d)),
                Change::Randomized(g) => ops.push(Op::Random(g)),
            }
        }
        ops
    }
}

impl<M: Model> Default for Change<M> {
    fn default() -> Self {
        Change::Empty
    }
}

impl<M: Model> FromIterator<Change<M>> for Change<M> {
    fn from_iter<I: IntoIterator<Item = Change<M>>>(iter: I) -> Self {
        Change::group(iter)
    }
}

impl<M: Model> fmt::Debug for Change<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Empty => f.write_str("Empty"),
            Change::Group(changes) => f.debug_tuple("Group").field(changes).finish(),
            Change::Mutate(m) => f.debug_tuple("Mutate").field(&m.kind).finish(),
            Change::Effect(e) => f.debug_tuple("Effect").field(e).finish(),
            Change::DeferUntil(after, d) => {
                f.debug_tuple("DeferUntil").field(after).field(d).finish()
            }
            Change::Randomized(_) => f.write_str("Randomized"),
        }
    }
}

// ---------------------------------------------------------------------------
// Op
// ---------------------------------------------------------------------------

/// One atomic operation of a flattened change tree.
pub enum Op<M: Model> {
    /// A state mutation.
    Mutate(Mutation<M>),
    /// A side effect to emit.
    Effect(M::Effect),
    /// A payload to schedule `Duration` after the apply-time clock.
    Defer(Duration, M::Delayed),
    /// A seed-driven generator, resolved when reached.
    Random(Generator<M>),
}

impl<M: Model> Op<M> {
    /// Short label, used in trace output and tests.
    pub fn label(&self) -> &'static str {
        match self {
            Op::Mutate(m) => match m.kind() {
                MutationKind::Update => "update",
                MutationKind::Spawn => "spawn",
                MutationKind::Remove => "remove",
                MutationKind::Transform => "transform",
            },
            Op::Effect(_) => "effect",
            Op::Defer(..) => "defer",
            Op::Random(_) => "random",
        }
    }
}

impl<M: Model> fmt::Debug for Op<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Effect(e) => f.debug_tuple("Effect").field(e).finish(),
            Op::Defer(after, d) => f.debug_tuple("Defer").field(after).field(d).finish(),
            other => f.write_str(other.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Store;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Beacon {
        lit: bool,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Coast {
        beacons: Store<Beacon>,
    }

    impl Entity<Coast> for Beacon {
        fn store(world: &Coast) -> &Store<Self> {
            &world.beacons
        }
        fn store_mut(world: &mut Coast) -> &mut Store<Self> {
            &mut world.beacons
        }
    }

    struct CoastModel;

    impl Model for CoastModel {
        type World = Coast;
        type Delayed = String;
        type Effect = &'static str;

        fn materialize(_delayed: &String) -> Change<Self> {
            Change::Empty
        }
    }

    type C = Change<CoastModel>;

    fn labels(change: C) -> Vec<&'static str> {
        change.flatten().iter().map(Op::label).collect()
    }

    #[test]
    fn flatten_is_depth_first_left_to_right() {
        let tree = C::group([
            C::effect("a"),
            C::group([C::effect("b"), C::Empty, C::group([C::effect("c")])]),
            C::defer(Duration::from_millis(1), "later".to_owned()),
            C::effect("d"),
        ]);

        let ops = tree.flatten();
        let effects: Vec<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Effect(e) => Some(*e),
                _ => None,
            })
            .collect();
        assert_eq!(effects, vec!["a", "b", "c", "d"]);
        assert_eq!(ops[3].label(), "defer");
    }

    #[test]
    fn flatten_drops_empty_nodes() {
        assert!(C::Empty.flatten().is_empty());
        assert!(C::group([]).flatten().is_empty());
        assert!(C::group([C::Empty, C::group([C::Empty])]).flatten().is_empty());
    }

    #[test]
    fn flatten_keeps_randomized_unresolved() {
        let tree = C::group([C::random(|_| C::effect("x")), C::remove::<Beacon>(EntityId::from_raw(1))]);
        assert_eq!(labels(tree), vec!["random", "remove"]);
    }

    #[test]
    fn then_appends_in_order() {
        let chain = C::effect("a").then(C::Empty).then(C::effect("b")).then(C::effect("c"));
        assert!(matches!(&chain, Change::Group(v) if v.len() == 3));
        assert_eq!(labels(chain), vec!["effect", "effect", "effect"]);
        assert!(matches!(C::Empty.then(C::effect("x")), Change::Effect("x")));
    }

    #[test]
    fn is_empty_sees_through_groups() {
        assert!(C::Empty.is_empty());
        assert!(C::group([C::Empty, C::group([])]).is_empty());
        assert!(!C::group([C::Empty, C::effect("a")]).is_empty());
    }

    #[test]
    fn update_reads_entity_at_apply_time() {
        let mut state = State::<CoastModel>::new(Coast::default(), 0);
        let id = state.insert(Beacon { lit: false });

        // Built before the entity changes; must observe the later value.
        let toggle = C::update::<Beacon, _>(id, |_, b| Beacon { lit: !b.lit });
        state.world_mut().beacons.get_mut(id).unwrap().lit = true;

        let Change::Mutate(m) = toggle else {
            panic!("expected Mutate")
        };
        assert_eq!(m.run(&mut state), Outcome::Applied);
        assert_eq!(state.get::<Beacon>(id), Some(&Beacon { lit: false }));
    }

    #[test]
    fn update_on_missing_id_reports_miss() {
        let mut state = State::<CoastModel>::new(Coast::default(), 0);
        let ghost = EntityId::from_raw(40);
        let Change::Mutate(m) = C::update::<Beacon, _>(ghost, |_, b| b.clone()) else {
            panic!("expected Mutate")
        };
        let before = state.clone();
        assert_eq!(m.run(&mut state), Outcome::Missed(ghost));
        assert_eq!(state, before);
    }

    #[test]
    fn debug_output_names_variants() {
        let tree = C::group([C::transform(|_| {}), C::effect("e")]);
        assert_eq!(format!("{tree:?}"), r#"Group([Mutate(Transform), Effect("e")])"#);
    }
}
