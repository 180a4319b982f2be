//! Release of due delayed effects.
//!
//! Pending entries live in the state as `(due, descriptor)` pairs with an
//! absolute due time. Once per tick, [`take_due`] splits them against the
//! pre-tick clock: entries with `due <= clock` leave the state, everything
//! else stays. Due entries come out ordered by due time, insertion order
//! breaking ties, and [`release_due`] turns them into one group of changes
//! through [`Model::materialize`].
//!
//! There is no cancellation. A delayed effect that may have become
//! irrelevant should re-check its precondition when materialized.

use tracing::debug;

use crate::change::Change;
use crate::model::Model;
use crate::state::{Pending, State};

/// Remove and return every pending entry due at the state's clock.
pub fn take_due<M: Model>(state: &mut State<M>) -> Vec<Pending<M::Delayed>> {
    let clock = state.clock();
    let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(state.pending_mut())
        .into_iter()
        .partition(|entry| entry.due <= clock);
    *state.pending_mut() = waiting;

    // Stable: equal due times keep insertion order.
    due.sort_by_key(|entry| entry.due);
    due
}

/// Map due entries to their changes, in order.
pub fn materialize<M: Model>(due: &[Pending<M::Delayed>]) -> Change<M> {
    Change::group(due.iter().map(|entry| M::materialize(&entry.payload)))
}

/// Take the due entries out of `state` and return them as one change,
/// together with how many entries were released.
pub fn release_due<M: Model>(state: &mut State<M>) -> (Change<M>, usize) {
    let due = take_due(state);
    if !due.is_empty() {
        debug!(
            clock = ?state.clock(),
            released = due.len(),
            still_pending = state.pending().len(),
            "delayed effects due"
        );
    }
    (materialize(&due), due.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::resolver::apply;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Board {
        rang: Vec<u32>,
    }

    struct Bells;

    impl Model for Bells {
        type World = Board;
        type Delayed = u32;
        type Effect = u32;

        fn materialize(bell: &u32) -> Change<Self> {
            let bell = *bell;
            Change::<Bells>::transform(move |s| s.world_mut().rang.push(bell)).then(Change::effect(bell))
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn state_at(clock: u64) -> State<Bells> {
        let mut state = State::<Bells>::new(Board::default(), 0);
        state.advance_clock(ms(clock));
        state
    }

    #[test]
    fn splits_due_from_waiting() {
        let mut state = state_at(0);
        state.schedule(ms(100), 1);
        state.schedule(ms(300), 2);
        state.schedule(ms(200), 3);
        state.advance_clock(ms(200));

        let due = take_due(&mut state);
        let payloads: Vec<u32> = due.iter().map(|p| p.payload).collect();
        assert_eq!(payloads, vec![1, 3]);
        assert_eq!(state.pending().len(), 1);
        assert_eq!(state.pending()[0].payload, 2);
    }

    #[test]
    fn due_entries_ordered_by_time_then_insertion() {
        let mut state = state_at(0);
        state.schedule(ms(50), 10);
        state.schedule(ms(20), 11);
        state.schedule(ms(50), 12);
        state.schedule(ms(20), 13);
        state.advance_clock(ms(50));

        let payloads: Vec<u32> = take_due(&mut state).iter().map(|p| p.payload).collect();
        assert_eq!(payloads, vec![11, 13, 10, 12]);
    }

    #[test]
    fn zero_delay_is_released_next_pass() {
        let mut state = state_at(500);
        state.schedule(Duration::ZERO, 7);
        assert_eq!(take_due(&mut state).len(), 1);
    }

    #[test]
    fn nothing_due_returns_empty_change() {
        let mut state = state_at(0);
        state.schedule(ms(10), 1);
        let (change, released) = release_due(&mut state);
        assert_eq!(released, 0);
        assert!(change.is_empty());
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn released_changes_apply_in_order() {
        let mut state = state_at(0);
        state.schedule(ms(5), 4);
        state.schedule(ms(1), 8);
        state.advance_clock(ms(5));

        let (change, released) = release_due(&mut state);
        assert_eq!(released, 2);
        let res = apply(&mut state, change);
        assert_eq!(state.world().rang, vec![8, 4]);
        assert_eq!(res.effects, vec![8, 4]);
        assert!(state.pending().is_empty());
    }
}
