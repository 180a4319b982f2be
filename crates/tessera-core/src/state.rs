//! The single authoritative simulation state.
//!
//! [`State`] aggregates the logical clock, the id counter, the random seed,
//! the pending delayed effects and the user's entity collections. It holds
//! data only: no closures live inside it, so it stays comparable and
//! serializable. Delayed effects are stored as descriptors and turned back
//! into changes through [`Model::materialize`] when they fall due.
//!
//! Between ticks a state is read-only to everybody except the tick driver.

use std::fmt;
use std::time::Duration;

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};
use crate::model::Model;
use crate::CoreError;

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

/// Deterministic RNG state threaded through randomized changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(pub u64);

impl Seed {
    /// Build a generator positioned at this seed.
    pub fn rng(self) -> Pcg32 {
        Pcg32::seed_from_u64(self.0)
    }

    /// Draw the successor seed from a generator.
    ///
    /// Called once a generator has produced everything it needs, so the
    /// successor never repeats a state that was already handed out.
    pub fn draw(rng: &mut Pcg32) -> Self {
        Self(rng.next_u64())
    }
}

// ---------------------------------------------------------------------------
// Pending
// ---------------------------------------------------------------------------

/// A delayed effect waiting in the state: absolute due time plus descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pending<D> {
    /// Clock value at which the effect becomes due.
    pub due: Duration,
    /// Data describing what to do when due.
    pub payload: D,
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Absolute point on the simulation clock, used in place of countdown timers.
///
/// Entities store a deadline once, when the timer starts, and compare it
/// against the clock afterwards. No per-tick decrement is ever needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deadline(pub Duration);

impl Deadline {
    /// Whether `clock` is strictly past this deadline.
    pub fn passed(self, clock: Duration) -> bool {
        clock > self.0
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The simulation state for model `M`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct State<M: Model> {
    clock: Duration,
    next_id: u64,
    seed: Seed,
    pending: Vec<Pending<M::Delayed>>,
    world: M::World,
}

impl<M: Model> State<M> {
    /// Create a state at clock zero around `world`, seeded with `seed`.
    ///
    /// The first allocated id is `#1`.
    pub fn new(world: M::World, seed: u64) -> Self {
        Self {
            clock: Duration::ZERO,
            next_id: 1,
            seed: Seed(seed),
            pending: Vec::new(),
            world,
        }
    }

    // -- clock --------------------------------------------------------------

    /// Time elapsed since the simulation started.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Advance the clock by `dt`. Only the tick driver calls this.
    pub fn advance_clock(&mut self, dt: Duration) {
        self.clock = self.clock.saturating_add(dt);
    }

    /// The deadline `after` from now.
    pub fn deadline_in(&self, after: Duration) -> Deadline {
        Deadline(self.clock.saturating_add(after))
    }

    // -- identities ---------------------------------------------------------

    /// Allocate a fresh entity id. Ids are never reused.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    /// The id the next allocation will return.
    pub fn next_id(&self) -> EntityId {
        EntityId::from_raw(self.next_id)
    }

    /// Allocate an id and store `entity` under it.
    ///
    /// Intended for initial setup; during a tick, entities are created via
    /// [`Change::spawn`](crate::change::Change::spawn).
    pub fn insert<E: Entity<M::World>>(&mut self, entity: E) -> EntityId {
        let id = self.allocate_id();
        E::store_mut(&mut self.world).insert(id, entity);
        id
    }

    /// Store `entity` under an id that was allocated earlier.
    ///
    /// Fails if `id` was never handed out by this state or is already
    /// occupied by an entity of the same kind.
    pub fn insert_with_id<E: Entity<M::World>>(
        &mut self,
        id: EntityId,
        entity: E,
    ) -> Result<(), CoreError> {
        if id.to_raw() == 0 || id.to_raw() >= self.next_id {
            return Err(CoreError::UnallocatedId {
                id,
                next_id: self.next_id(),
            });
        }
        let store = E::store_mut(&mut self.world);
        if store.contains(id) {
            return Err(CoreError::OccupiedId { id });
        }
        store.insert(id, entity);
        Ok(())
    }

    /// Look up an entity of kind `E`.
    pub fn get<E: Entity<M::World>>(&self, id: EntityId) -> Option<&E> {
        E::store(&self.world).get(id)
    }

    // -- seed ---------------------------------------------------------------

    /// Current RNG seed.
    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub(crate) fn set_seed(&mut self, seed: Seed) {
        self.seed = seed;
    }

    // -- pending delayed effects -------------------------------------------

    /// Delayed effects not yet due, in insertion order.
    pub fn pending(&self) -> &[Pending<M::Delayed>] {
        &self.pending
    }

    /// Queue `payload` to fall due `after` from the current clock.
    ///
    /// A zero delay is legal: the entry is released by the next tick's
    /// scheduling pass, never dropped.
    pub fn schedule(&mut self, after: Duration, payload: M::Delayed) {
        let due = self.clock.saturating_add(after);
        self.pending.push(Pending { due, payload });
    }

    pub(crate) fn pending_mut(&mut self) -> &mut Vec<Pending<M::Delayed>> {
        &mut self.pending
    }

    // -- world --------------------------------------------------------------

    /// The user's entity collections.
    pub fn world(&self) -> &M::World {
        &self.world
    }

    /// Exclusive access to the user's entity collections.
    pub fn world_mut(&mut self) -> &mut M::World {
        &mut self.world
    }
}

impl<M: Model> Clone for State<M> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock,
            next_id: self.next_id,
            seed: self.seed,
            pending: self.pending.clone(),
            world: self.world.clone(),
        }
    }
}

impl<M: Model> PartialEq for State<M> {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock
            && self.next_id == other.next_id
            && self.seed == other.seed
            && self.pending == other.pending
            && self.world == other.world
    }
}

impl<M: Model> fmt::Debug for State<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("clock", &self.clock)
            .field("next_id", &self.next_id)
            .field("seed", &self.seed)
            .field("pending", &self.pending)
            .field("world", &self.world)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
