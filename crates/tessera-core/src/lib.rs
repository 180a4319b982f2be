//! Tessera core -- change values, entity store, scheduling and resolution.
//!
//! This crate holds the deterministic heart of the Tessera simulation
//! engine. Producers observe a frozen [`State`](state::State) and answer
//! with [`Change`](change::Change) values describing what they want to
//! happen. The [`resolver`] folds a tree of changes into the state in one
//! sequential pass, emitting side effects, queueing delayed effects and
//! resolving seeded randomness as it goes. The [`scheduler`] releases
//! delayed effects once they fall due.
//!
//! # Quick Start
//!
//! ```
//! use tessera_core::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Unit { life: u32, max: u32 }
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Arena { units: Store<Unit> }
//!
//! impl Entity<Arena> for Unit {
//!     fn store(world: &Arena) -> &Store<Self> { &world.units }
//!     fn store_mut(world: &mut Arena) -> &mut Store<Self> { &mut world.units }
//! }
//!
//! struct Skirmish;
//!
//! impl Model for Skirmish {
//!     type World = Arena;
//!     type Delayed = ();
//!     type Effect = String;
//!     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! }
//!
//! let mut state = State::<Skirmish>::new(Arena::default(), 1);
//! let unit = state.insert(Unit { life: 5, max: 10 });
//!
//! let heal = Change::update::<Unit, _>(unit, |_, u| Unit {
//!     life: (u.life + 3).min(u.max),
//!     ..u.clone()
//! });
//! let resolution = apply(&mut state, heal);
//!
//! assert_eq!(state.get::<Unit>(unit).unwrap().life, 8);
//! assert!(resolution.effects.is_empty());
//! ```

#![deny(unsafe_code)]

pub mod change;
pub mod entity;
pub mod model;
pub mod resolver;
pub mod scheduler;
pub mod state;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by checked state operations.
///
/// Nothing on the tick path returns these: a change aimed at a vanished
/// entity is a silent no-op, not an error.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The id was never handed out by this state's allocator.
    #[error("entity {id} was never allocated (next id is {next_id})")]
    UnallocatedId {
        id: entity::EntityId,
        next_id: entity::EntityId,
    },

    /// Another entity of the same kind already lives under this id.
    #[error("entity {id} is already occupied")]
    OccupiedId { id: entity::EntityId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::change::{Change, Generator, Mutation, MutationKind, Op, Outcome};
    pub use crate::entity::{Entity, EntityId, Store};
    pub use crate::model::Model;
    pub use crate::resolver::{apply, apply_into, resolve, ApplyReport, Resolution};
    pub use crate::scheduler::{release_due, take_due};
    pub use crate::state::{Deadline, Pending, Seed, State};
    pub use crate::CoreError;
}
