//! Device states: descriptors, their catalogue, and the machinery that turns
//! decoded values into host writes.

pub mod catalogue;
pub mod context;
pub mod descriptor;
pub mod resolver;
pub mod store;
pub mod timers;

pub use catalogue::StateKind;
pub use context::{Context, ContextEntry};
pub use descriptor::{
    Behavior, DataType, DisplayMeta, StateDescriptor, StateObject, ValueMap, WireKey, WirePair,
};
pub use store::{Emission, MemoryStore, StateSink};
pub use timers::{TimerKey, TimerRegistry};

use serde_json::Value;
use std::sync::Arc;

/// A state taking part in a message. `value` is `None` when the state was
/// pulled in as a dependency and has nothing new of its own.
#[derive(Debug, Clone)]
pub struct DecodedState {
    pub state: Arc<StateDescriptor>,
    pub value: Option<Value>,
}

impl DecodedState {
    pub fn name(&self) -> &str {
        self.state.name()
    }
}
