//! Merge channels: per-key strategies for combining partial state updates

use crate::error::{CheckpointError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Full state of a run: string key to JSON value
pub type StateData = HashMap<String, Value>;

/// Partial update emitted by a node, merged into [`StateData`] via channels
pub type StateUpdate = HashMap<String, Value>;

/// A per-key merge strategy
///
/// Channels decide how a new value for a key is combined with the value
/// already in the state. Implementations must be deterministic and free of
/// side effects; the engine relies on that to make merges reproducible.
pub trait Channel: Send + Sync + Debug {
    /// Combine the current value (if any) with an incoming value
    fn combine(&self, current: Option<Value>, incoming: Value) -> Result<Value>;

    /// Clone the channel into a Box
    fn clone_box(&self) -> Box<dyn Channel>;
}

/// Keeps only the most recent value. Default for undeclared keys.
#[derive(Debug, Clone, Default)]
pub struct LastValue;

impl Channel for LastValue {
    fn combine(&self, _current: Option<Value>, incoming: Value) -> Result<Value> {
        Ok(incoming)
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Appends incoming values to a JSON array
///
/// Non-array operands are lifted to singleton arrays, so a node may emit a
/// bare value or a batch and the result is the same flat list.
#[derive(Debug, Clone, Default)]
pub struct Appender;

fn lift(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

impl Channel for Appender {
    fn combine(&self, current: Option<Value>, incoming: Value) -> Result<Value> {
        let mut items = match current {
            Some(value) => lift(value),
            None => Vec::new(),
        };
        items.extend(lift(incoming));
        Ok(Value::Array(items))
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Reducer function type for [`Reducer`] channels
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Combines values with an arbitrary binary function
///
/// The function should be associative so that merging a batch of updates is
/// independent of how the batch is grouped.
#[derive(Clone)]
pub struct Reducer {
    reducer: ReducerFn,
}

impl Reducer {
    /// Create a reducer channel from a combine function
    pub fn new<F>(reducer: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            reducer: Arc::new(reducer),
        }
    }

    /// Numeric addition over f64 operands
    pub fn sum() -> Self {
        Self::new(|a, b| {
            let a_num = a.as_f64().unwrap_or(0.0);
            let b_num = b.as_f64().unwrap_or(0.0);
            serde_json::json!(a_num + b_num)
        })
    }

    /// Array concatenation, lifting non-array operands
    pub fn concat() -> Self {
        Self::new(|a, b| {
            let mut items = lift(a);
            items.extend(lift(b));
            Value::Array(items)
        })
    }
}

impl Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("reducer", &"<function>")
            .finish()
    }
}

impl Channel for Reducer {
    fn combine(&self, current: Option<Value>, incoming: Value) -> Result<Value> {
        Ok(match current {
            Some(value) => (self.reducer)(value, incoming),
            None => incoming,
        })
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Table of declared channels, keyed by state key
///
/// Applying an update walks the update's keys in sorted order, so the merged
/// result never depends on map iteration order. Keys without a declared
/// channel fall back to [`LastValue`] semantics.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelTable {
    /// Create an empty table (every key is last-write-wins)
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel for a key, replacing any previous declaration
    pub fn insert(&mut self, key: impl Into<String>, channel: impl Channel + 'static) {
        self.channels.insert(key.into(), Arc::new(channel));
    }

    /// Look up the channel declared for a key
    pub fn get(&self, key: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(key)
    }

    /// Merge one partial update into a state, returning the new state
    ///
    /// Pure: neither input is modified. Update keys are visited in sorted
    /// order.
    pub fn apply(&self, current: &StateData, update: &StateUpdate) -> Result<StateData> {
        let mut next = current.clone();
        let mut keys: Vec<&String> = update.keys().collect();
        keys.sort();
        for key in keys {
            let incoming = update
                .get(key)
                .cloned()
                .ok_or_else(|| CheckpointError::InvalidUpdate(format!("missing key {key}")))?;
            let merged = match self.channels.get(key) {
                Some(channel) => channel.combine(next.remove(key), incoming)?,
                None => incoming,
            };
            next.insert(key.clone(), merged);
        }
        Ok(next)
    }

    /// Merge a batch of updates, one at a time, in slice order
    ///
    /// The engine passes parallel branch results here in branch declaration
    /// order, never completion order.
    pub fn apply_all(&self, current: &StateData, updates: &[StateUpdate]) -> Result<StateData> {
        let mut state = current.clone();
        for update in updates {
            state = self.apply(&state, update)?;
        }
        Ok(state)
    }
}
