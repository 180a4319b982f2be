//! Producer registry and per-tick change collection.
//!
//! A producer ("think function") looks at the frozen pre-tick state and
//! proposes a [`Change`]. The [`Collector`] invokes every registered
//! producer against the same state and assembles their proposals into one
//! group, in a fixed order:
//!
//! 1. global producers, in registration order;
//! 2. per-entity producers, in registration order, each visiting the
//!    entities of its kind in ascending id order.
//!
//! Producers must be pure and total: they return [`Change::Empty`] when
//! they have nothing to propose. Because they only read, they may run in
//! parallel (cargo feature `parallel`), both across producers and across
//! the entities one per-entity producer visits; their results are merged
//! in the same fixed order either way.

use std::sync::Arc;

use tessera_core::change::Change;
use tessera_core::entity::{Entity, EntityId};
use tessera_core::model::Model;
use tessera_core::state::State;

// ---------------------------------------------------------------------------
// ProducerFn
// ---------------------------------------------------------------------------

/// A producer as stored by the collector.
pub type ProducerFn<M> = Box<dyn Fn(&State<M>) -> Change<M> + Send + Sync>;

/// Which ordering class a producer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerClass {
    /// Runs once per tick, before any per-entity producer.
    Global,
    /// Runs once per entity of one kind.
    PerEntity,
}

/// A named producer in the registry.
struct RegisteredProducer<M: Model> {
    name: String,
    class: ProducerClass,
    func: ProducerFn<M>,
    /// Entity-parallel form of `func`, for per-entity producers.
    #[cfg(feature = "parallel")]
    par_func: Option<ProducerFn<M>>,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Ordered set of producers for model `M`.
pub struct Collector<M: Model> {
    globals: Vec<RegisteredProducer<M>>,
    per_entity: Vec<RegisteredProducer<M>>,
}

impl<M: Model> Collector<M> {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            per_entity: Vec::new(),
        }
    }

    /// Register a global producer.
    ///
    /// # Panics
    ///
    /// Panics if a producer with the same name is already registered.
    pub fn add_producer<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&State<M>) -> Change<M> + Send + Sync + 'static,
    {
        self.assert_unique(name);
        self.globals.push(RegisteredProducer {
            name: name.to_owned(),
            class: ProducerClass::Global,
            func: Box::new(func),
            #[cfg(feature = "parallel")]
            par_func: None,
        });
    }

    /// Register a producer invoked once per entity of kind `E`.
    ///
    /// # Panics
    ///
    /// Panics if a producer with the same name is already registered.
    pub fn add_entity_producer<E, F>(&mut self, name: &str, func: F)
    where
        E: Entity<M::World>,
        F: Fn(&State<M>, EntityId, &E) -> Change<M> + Send + Sync + 'static,
    {
        self.assert_unique(name);
        let func = Arc::new(func);
        #[cfg(feature = "parallel")]
        let par_func = Some(par_visit_all::<M, E, F>(Arc::clone(&func)));
        let visit_all = move |state: &State<M>| -> Change<M> {
            E::store(state.world())
                .iter()
                .map(|(id, entity)| func(state, id, entity))
                .collect()
        };
        self.per_entity.push(RegisteredProducer {
            name: name.to_owned(),
            class: ProducerClass::PerEntity,
            func: Box::new(visit_all),
            #[cfg(feature = "parallel")]
            par_func,
        });
    }

    fn assert_unique(&self, name: &str) {
        assert!(
            !self.producers().any(|p| p.name == name),
            "duplicate producer name: {name:?}"
        );
    }

    fn producers(&self) -> impl Iterator<Item = &RegisteredProducer<M>> + '_ {
        self.globals.iter().chain(self.per_entity.iter())
    }

    /// Invoke every producer against `state` and group the proposals.
    pub fn collect(&self, state: &State<M>) -> Change<M> {
        Change::Group(self.producers().map(|p| (p.func)(state)).collect())
    }

    /// Like [`collect`](Self::collect), evaluating producers on the rayon
    /// thread pool. Per-entity producers also split their entities across
    /// the pool. The result is identical to the sequential one.
    #[cfg(feature = "parallel")]
    pub fn collect_parallel(&self, state: &State<M>) -> Change<M> {
        use rayon::prelude::*;

        let producers: Vec<&RegisteredProducer<M>> = self.producers().collect();
        // Indexed collect keeps registration order.
        let proposals: Vec<Change<M>> = producers
            .par_iter()
            .map(|p| match &p.par_func {
                Some(par_func) => par_func(state),
                None => (p.func)(state),
            })
            .collect();
        Change::Group(proposals)
    }

    /// Number of registered producers.
    pub fn len(&self) -> usize {
        self.globals.len() + self.per_entity.len()
    }

    /// Whether no producer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer names in invocation order.
    pub fn names(&self) -> Vec<&str> {
        self.producers().map(|p| p.name.as_str()).collect()
    }

    /// Producer names with their class, in invocation order.
    pub fn describe(&self) -> Vec<(&str, ProducerClass)> {
        self.producers().map(|p| (p.name.as_str(), p.class)).collect()
    }
}

/// Per-entity visitor that evaluates `func` for each entity on the rayon
/// pool, keeping ascending id order in the result.
#[cfg(feature = "parallel")]
fn par_visit_all<M, E, F>(func: Arc<F>) -> ProducerFn<M>
where
    M: Model,
    E: Entity<M::World>,
    F: Fn(&State<M>, EntityId, &E) -> Change<M> + Send + Sync + 'static,
{
    use rayon::prelude::*;

    Box::new(move |state: &State<M>| -> Change<M> {
        let entities: Vec<(EntityId, &E)> = E::store(state.world()).iter().collect();
        let proposals: Vec<Change<M>> = entities
            .par_iter()
            .map(|&(id, entity)| func(state, id, entity))
            .collect();
        proposals.into_iter().collect()
    })
}

impl<M: Model> Default for Collector<M> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
