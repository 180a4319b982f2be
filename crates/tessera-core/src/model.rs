//! Binding between a concrete simulation and the engine.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::change::Change;

/// Type-level description of one simulation.
///
/// A model names the world type holding its entity collections, the
/// delayed-effect descriptor type and the side-effect type, and provides
/// the single translation from descriptors back to changes.
///
/// Descriptors are data rather than closures so that pending delayed
/// effects can be compared, hashed and serialized along with the rest of
/// the state. The cost is that every new kind of delayed effect needs a
/// descriptor variant and a case in [`materialize`](Model::materialize).
pub trait Model: Sized + Send + Sync + 'static {
    /// Entity collections plus any model-specific globals.
    type World: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Descriptor of a delayed effect.
    type Delayed: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Externally visible consequence emitted by a tick.
    type Effect: Clone + Debug + Send + 'static;

    /// Turn a due descriptor into the change it stands for.
    ///
    /// Must be pure. The returned change runs against the state as it is
    /// when the descriptor falls due, so it is the place to re-check any
    /// condition that may have been invalidated in the meantime.
    fn materialize(delayed: &Self::Delayed) -> Change<Self>;
}
