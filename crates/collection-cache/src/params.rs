use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable mapping from parameter names to resolved plain values, taken at one instant.
///
/// Snapshots are compared by deep structural equality, never by identity. Two snapshots
/// built from the same live values at different times compare equal as long as the values
/// themselves are structurally equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamsSnapshot(BTreeMap<String, Value>);

impl ParamsSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot with `value` added under `name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Returns the value of the parameter `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The number of parameters in this snapshot.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this snapshot has no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for ParamsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A capability that can be resolved into a plain parameter snapshot at any time.
///
/// Resolution must be pure: it reads the current value of every parameter and has no side
/// effects. The coordinator resolves on every change notification and on every staleness
/// check, and snapshot guards re-resolve lazily to decide whether a background refresh
/// result is still applicable.
pub trait ParamsSource: Send + Sync + 'static {
    /// Resolves every parameter to its current plain value.
    fn resolve(&self) -> ParamsSnapshot;
}

impl ParamsSource for ParamsSnapshot {
    fn resolve(&self) -> ParamsSnapshot {
        self.clone()
    }
}

impl<F> ParamsSource for F
where
    F: Fn() -> ParamsSnapshot + Send + Sync + 'static,
{
    fn resolve(&self) -> ParamsSnapshot {
        self()
    }
}

type LiveValue = Arc<dyn Fn() -> Value + Send + Sync>;

enum ParamCell {
    Plain(Value),
    Live(LiveValue),
}

/// A parameter set mixing plain values and live values.
///
/// Live values are re-read on every [`resolve`](ParamsSource::resolve), one level deep:
/// the closure's return value is taken as-is and not resolved further. Plain values are
/// copied into every snapshot unchanged.
#[derive(Default)]
pub struct Params {
    cells: BTreeMap<String, ParamCell>,
}

impl Params {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plain value under `name`.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cells.insert(name.into(), ParamCell::Plain(value.into()));
        self
    }

    /// Adds a live value under `name`, re-read on every snapshot.
    pub fn with_live<F>(mut self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.cells.insert(name.into(), ParamCell::Live(Arc::new(value)));
        self
    }
}

impl ParamsSource for Params {
    fn resolve(&self) -> ParamsSnapshot {
        self.cells
            .iter()
            .map(|(name, cell)| {
                let value = match cell {
                    ParamCell::Plain(value) => value.clone(),
                    ParamCell::Live(read) => read(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, cell) in &self.cells {
            match cell {
                ParamCell::Plain(value) => map.entry(name, value),
                ParamCell::Live(_) => map.entry(name, &"<live>"),
            };
        }
        map.finish()
    }
}
