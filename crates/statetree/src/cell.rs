//! The leaf value holder.

use serde_json::Value;

/// A single mutable value register.
///
/// Change notification is owned by the node layer: the cell only stores and
/// swaps values, so patch synthesis can capture the old value exactly once.
#[derive(Debug, Clone, Default)]
pub struct StorageCell {
    value: Value,
}

impl StorageCell {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Swap in a new value, returning the previous one.
    pub fn replace(&mut self, value: Value) -> Value {
        std::mem::replace(&mut self.value, value)
    }
}
