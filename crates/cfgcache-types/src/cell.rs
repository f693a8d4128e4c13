use std::fmt;
use std::sync::OnceLock;

use crate::error::TypeError;
use crate::value::Value;

/// Set-once cell that is itself a node of the graph.
///
/// Reference cycles must pass through a `SharedCell`: build the cells
/// first, reference them from wherever they are needed, then [`set`] their
/// contents. On load the cell is allocated empty and made visible to
/// back-references before its contents are decoded, which is what lets a
/// cycle close on it.
///
/// [`set`]: SharedCell::set
#[derive(Default)]
pub struct SharedCell {
    slot: OnceLock<Value>,
}

impl SharedCell {
    /// An empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell that already holds `value`.
    pub fn with(value: Value) -> Self {
        let cell = Self::new();
        let _ = cell.slot.set(value);
        cell
    }

    /// Fill the cell. Fails if it was already filled.
    pub fn set(&self, value: Value) -> Result<(), TypeError> {
        self.slot.set(value).map_err(|_| TypeError::CellAlreadySet)
    }

    /// Contents, if the cell has been filled.
    pub fn get(&self) -> Option<&Value> {
        self.slot.get()
    }

    /// Returns `true` once the cell has been filled.
    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl fmt::Debug for SharedCell {
    // Contents are not printed: they may lead back to this cell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCell")
            .field("set", &self.is_set())
            .finish()
    }
}
