//! Fixed-timestep tick loop for deterministic simulation.
//!
//! Each tick, at pre-tick clock `T`:
//!
//! 1. The [`Collector`] runs every producer against the unmodified state.
//! 2. The scheduler takes pending delayed effects with `due <= T` out of the
//!    state and materializes them; they are grouped after the proposals.
//! 3. The combined change is folded into the state in one pass, threading
//!    the random seed and collecting side effects.
//! 4. The clock advances to `T + fixed_dt`.
//!
//! [`TickLoop`] runs these phases on a copy of its state and swaps it in
//! only once all four are done. A tick that unwinds part-way leaves the
//! previous state, pending delayed effects included, exactly as it was.
//!
//! Nothing outside the state and the registered producers feeds into a
//! tick, so the same starting state and producers always produce the same
//! states and side effects.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Counter { value: u64 }
//!
//! struct Count;
//!
//! impl Model for Count {
//!     type World = Counter;
//!     type Delayed = ();
//!     type Effect = u64;
//!     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! }
//!
//! let config = TickConfig { fixed_dt: Duration::from_millis(10), ..Default::default() };
//! let mut tick_loop = TickLoop::new(State::<Count>::new(Counter::default(), 0), config);
//!
//! tick_loop.add_producer("count", |state| {
//!     let next = state.world().value + 1;
//!     Change::<Count>::transform(move |s| s.world_mut().value = next).then(Change::effect(next))
//! });
//!
//! let outcome = tick_loop.tick();
//! assert_eq!(outcome.effects, vec![1]);
//!
//! tick_loop.run_ticks(9);
//! assert_eq!(tick_loop.state().world().value, 10);
//! assert_eq!(tick_loop.clock(), Duration::from_millis(100));
//! ```

use std::time::{Duration, Instant};

use tracing::debug;

use tessera_core::change::Change;
use tessera_core::entity::{Entity, EntityId};
use tessera_core::model::Model;
use tessera_core::resolver::{apply_into, ApplyReport};
use tessera_core::scheduler::release_due;
use tessera_core::state::State;

use crate::collector::Collector;
use crate::sink::EffectSink;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Simulated time per tick. Must be non-zero.
    pub fixed_dt: Duration,
    /// Share of mutations per tick above which whole-state transforms are
    /// reported as over budget. In `0.0..=1.0`.
    pub transform_budget: f64,
    /// Evaluate producers on the rayon pool. Only honoured when the crate
    /// is built with the `parallel` feature.
    pub parallel: bool,
}

impl Default for TickConfig {
    /// 16 ms per tick, a quarter of mutations as transform budget,
    /// sequential producers.
    fn default() -> Self {
        Self {
            fixed_dt: Duration::from_millis(16),
            transform_budget: 0.25,
            parallel: false,
        }
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Wall-clock timing of the last tick. Informational only; never fed back
/// into the simulation.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Time spent running producers.
    pub collect_time: Duration,
    /// Time spent releasing due delayed effects.
    pub schedule_time: Duration,
    /// Time spent folding the combined change.
    pub apply_time: Duration,
    /// Total time for the tick.
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

/// What one tick emitted.
pub struct TickOutcome<M: Model> {
    /// Side effects, in emission order.
    pub effects: Vec<M::Effect>,
    /// Apply counters for the tick.
    pub report: ApplyReport,
}

impl<M: Model> std::fmt::Debug for TickOutcome<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickOutcome")
            .field("effects", &self.effects)
            .field("report", &self.report)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// step
// ---------------------------------------------------------------------------

/// Run one tick: `(State) -> (State, side effects)`.
///
/// The by-value entry point. [`TickLoop`] wraps the same logic around an
/// owned state.
pub fn step<M: Model>(
    mut state: State<M>,
    collector: &Collector<M>,
    fixed_dt: Duration,
) -> (State<M>, TickOutcome<M>) {
    let outcome = step_in_place(&mut state, collector, fixed_dt, false).0;
    (state, outcome)
}

fn step_in_place<M: Model>(
    state: &mut State<M>,
    collector: &Collector<M>,
    fixed_dt: Duration,
    parallel: bool,
) -> (TickOutcome<M>, TickDiagnostics) {
    let tick_start = Instant::now();

    // Phase 1: producers against the pre-tick state.
    let collect_start = Instant::now();
    let proposed = collect(collector, state, parallel);
    let collect_time = collect_start.elapsed();

    // Phase 2: due delayed effects go after the proposals.
    let schedule_start = Instant::now();
    let (due, released) = release_due(state);
    let schedule_time = schedule_start.elapsed();

    // Phase 3: single fold.
    let apply_start = Instant::now();
    let mut effects = Vec::new();
    let mut report = ApplyReport {
        delayed_materialized: released,
        ..ApplyReport::default()
    };
    apply_into(state, Change::Group(vec![proposed, due]), &mut effects, &mut report);
    let apply_time = apply_start.elapsed();

    // Phase 4: advance the clock.
    state.advance_clock(fixed_dt);

    let diagnostics = TickDiagnostics {
        collect_time,
        schedule_time,
        apply_time,
        total_time: tick_start.elapsed(),
    };
    (TickOutcome { effects, report }, diagnostics)
}

#[cfg(feature = "parallel")]
fn collect<M: Model>(collector: &Collector<M>, state: &State<M>, parallel: bool) -> Change<M> {
    if parallel {
        collector.collect_parallel(state)
    } else {
        collector.collect(state)
    }
}

#[cfg(not(feature = "parallel"))]
fn collect<M: Model>(collector: &Collector<M>, state: &State<M>, _parallel: bool) -> Change<M> {
    collector.collect(state)
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The deterministic fixed-timestep tick loop.
///
/// Owns the single live [`State`] and the producer registry. Between ticks
/// the state is only reachable through shared references, apart from the
/// explicit setup accessor [`state_mut`](Self::state_mut).
pub struct TickLoop<M: Model> {
    /// The simulation state.
    pub(crate) state: State<M>,
    /// Producers invoked every tick.
    collector: Collector<M>,
    /// Number of ticks executed so far.
    pub(crate) tick_counter: u64,
    /// Configuration used to create this tick loop.
    pub(crate) config: TickConfig,
    /// Diagnostics from the last tick.
    last_diagnostics: TickDiagnostics,
    /// Counters from the last tick.
    last_report: ApplyReport,
}

impl<M: Model> TickLoop<M> {
    /// Create a tick loop around `state`.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is zero or `config.transform_budget` is
    /// outside `0.0..=1.0`.
    pub fn new(state: State<M>, config: TickConfig) -> Self {
        assert!(
            !config.fixed_dt.is_zero(),
            "fixed_dt must be non-zero, got {:?}",
            config.fixed_dt
        );
        assert!(
            (0.0..=1.0).contains(&config.transform_budget),
            "transform_budget must be in 0.0..=1.0, got {}",
            config.transform_budget
        );
        Self {
            state,
            collector: Collector::new(),
            tick_counter: 0,
            config,
            last_diagnostics: TickDiagnostics::default(),
            last_report: ApplyReport::default(),
        }
    }

    /// Register a global producer. See [`Collector::add_producer`].
    pub fn add_producer<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&State<M>) -> Change<M> + Send + Sync + 'static,
    {
        self.collector.add_producer(name, func);
    }

    /// Register a per-entity producer. See [`Collector::add_entity_producer`].
    pub fn add_entity_producer<E, F>(&mut self, name: &str, func: F)
    where
        E: Entity<M::World>,
        F: Fn(&State<M>, EntityId, &E) -> Change<M> + Send + Sync + 'static,
    {
        self.collector.add_entity_producer::<E, F>(name, func);
    }

    /// Execute one tick and return what it emitted.
    ///
    /// If a producer or a mutation panics, the panic propagates and the
    /// loop keeps its pre-tick state and tick count.
    pub fn tick(&mut self) -> TickOutcome<M> {
        let mut next = self.state.clone();
        let (outcome, diagnostics) = step_in_place(
            &mut next,
            &self.collector,
            self.config.fixed_dt,
            self.config.parallel,
        );
        self.state = next;
        self.tick_counter += 1;

        let report = outcome.report;
        debug!(
            tick = self.tick_counter,
            clock = ?self.state.clock(),
            mutations = report.mutations(),
            transforms = report.transforms,
            misses = report.identity_misses,
            effects = report.effects,
            pending = self.state.pending().len(),
            "tick complete"
        );
        if report.transform_share() > self.config.transform_budget {
            debug!(
                tick = self.tick_counter,
                share = report.transform_share(),
                budget = self.config.transform_budget,
                "whole-state transforms over budget"
            );
        }

        self.last_diagnostics = diagnostics;
        self.last_report = report;
        outcome
    }

    /// Execute one tick and hand its side effects to `sink`.
    pub fn tick_into<S: EffectSink<M::Effect>>(&mut self, sink: &mut S) -> ApplyReport {
        let clock = self.state.clock();
        let TickOutcome { effects, report } = self.tick();
        sink.consume(clock, effects);
        report
    }

    /// Run `count` ticks, returning the summed apply counters.
    ///
    /// Side effects are discarded; use [`tick_into`](Self::tick_into) to
    /// keep them.
    pub fn run_ticks(&mut self, count: u64) -> ApplyReport {
        let mut total = ApplyReport::default();
        for _ in 0..count {
            total += self.tick().report;
        }
        total
    }

    /// Run `count` ticks, handing every tick's effects to `sink`.
    pub fn run_ticks_into<S: EffectSink<M::Effect>>(&mut self, count: u64, sink: &mut S) -> ApplyReport {
        let mut total = ApplyReport::default();
        for _ in 0..count {
            total += self.tick_into(sink);
        }
        total
    }

    // -- accessors ----------------------------------------------------------

    /// The number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// The current simulation clock.
    pub fn clock(&self) -> Duration {
        self.state.clock()
    }

    /// The fixed time step per tick.
    pub fn fixed_dt(&self) -> Duration {
        self.config.fixed_dt
    }

    /// Read-only access to the state.
    pub fn state(&self) -> &State<M> {
        &self.state
    }

    /// Mutable access to the state.
    ///
    /// For initial setup and tests. During simulation every change should
    /// come from a producer.
    pub fn state_mut(&mut self) -> &mut State<M> {
        &mut self.state
    }

    /// The producer registry.
    pub fn collector(&self) -> &Collector<M> {
        &self.collector
    }

    /// Diagnostics from the last tick.
    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    /// Apply counters from the last tick.
    pub fn last_report(&self) -> &ApplyReport {
        &self.last_report
    }

    /// The configuration this loop runs with.
    pub fn config(&self) -> &TickConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
