//! Entity identities and keyed entity collections.
//!
//! An [`EntityId`] is a plain 64-bit handle drawn from the state's id counter.
//! Ids are never recycled: once an entity is removed, its id stays dead for
//! the rest of the simulation, so a stale id can only ever miss, never alias
//! a newer entity.
//!
//! A [`Store`] holds every live entity of one kind, ordered by id. Ordered
//! storage is what gives producers and snapshots a stable iteration order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Stable identity of an entity, unique for the lifetime of the simulation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw id value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId(#{})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An entity kind stored inside a world type `W`.
///
/// Implementors are plain records: they hold identities of other entities
/// (never references), so they stay cheap to copy out, compare and
/// serialize. The two accessors locate the kind's [`Store`] inside the
/// world, which is all the identity-targeted change helpers need.
///
/// ```
/// use tessera_core::entity::{Entity, Store};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Unit { life: u32 }
///
/// #[derive(Default)]
/// struct Arena { units: Store<Unit> }
///
/// impl Entity<Arena> for Unit {
///     fn store(world: &Arena) -> &Store<Self> { &world.units }
///     fn store_mut(world: &mut Arena) -> &mut Store<Self> { &mut world.units }
/// }
/// ```
pub trait Entity<W>: Clone + Send + Sync + 'static {
    /// Shared access to this kind's collection.
    fn store(world: &W) -> &Store<Self>;

    /// Exclusive access to this kind's collection.
    fn store_mut(world: &mut W) -> &mut Store<Self>;
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Keyed collection of one entity kind, iterated in ascending id order.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store<E> {
    entries: BTreeMap<EntityId, E>,
}

impl<E> Store<E> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Look up an entity by id.
    pub fn get(&self, id: EntityId) -> Option<&E> {
        self.entries.get(&id)
    }

    /// Exclusive access to an entity by id.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut E> {
        self.entries.get_mut(&id)
    }

    /// Insert or overwrite the entity stored under `id`, returning the
    /// previous value if there was one.
    pub fn insert(&mut self, id: EntityId, entity: E) -> Option<E> {
        self.entries.insert(id, entity)
    }

    /// Remove the entity stored under `id`.
    pub fn remove(&mut self, id: EntityId) -> Option<E> {
        self.entries.remove(&id)
    }

    /// Whether an entity is stored under `id`.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Iterate `(id, entity)` pairs in ascending id order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (EntityId, &E)> + '_ {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Iterate `(id, entity)` pairs mutably in ascending id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut E)> + '_ {
        self.entries.iter_mut().map(|(id, e)| (*id, e))
    }

    /// All stored ids in ascending order.
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = EntityId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the entities for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(EntityId, &mut E) -> bool) {
        self.entries.retain(|id, e| keep(*id, e));
    }
}

impl<E> Default for Store<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<E> FromIterator<(EntityId, E)> for Store<E> {
    fn from_iter<I: IntoIterator<Item = (EntityId, E)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
