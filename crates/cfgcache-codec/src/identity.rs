//! Session-scoped identity tables.
//!
//! Ids are assigned sequentially in the order objects are first written,
//! and the reader reserves them in the same order, so ids never appear on
//! the wire for fresh objects, only in back-references.

use std::collections::HashMap;

use cfgcache_types::Value;

use crate::error::{FormatError, FormatResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    /// The codec for this object has not returned yet.
    InProgress { publishes_early: bool },
    Done,
}

/// Result of looking up a value that was already written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Known {
    pub id: u32,
    pub state: WriteState,
}

impl Known {
    /// A back-reference to this object can be resolved by the reader.
    pub fn is_referenceable(&self) -> bool {
        match self.state {
            WriteState::Done => true,
            WriteState::InProgress { publishes_early } => publishes_early,
        }
    }
}

struct WriteEntry {
    // Held so the address stays reserved for the whole session.
    value: Value,
    state: WriteState,
}

/// Write side: object identity to id.
#[derive(Default)]
pub struct WriteIdentityTable {
    ids: HashMap<usize, u32>,
    entries: Vec<WriteEntry>,
}

impl WriteIdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, value: &Value) -> Option<Known> {
        let id = *self.ids.get(&value.identity()?)?;
        Some(Known {
            id,
            state: self.entries[id as usize].state,
        })
    }

    /// Assign the next id to a non-null value not yet in the table.
    pub fn assign(&mut self, value: &Value, publishes_early: bool) -> u32 {
        let id = self.entries.len() as u32;
        if let Some(key) = value.identity() {
            self.ids.insert(key, id);
        }
        self.entries.push(WriteEntry {
            value: value.clone(),
            state: WriteState::InProgress { publishes_early },
        });
        id
    }

    pub fn complete(&mut self, id: u32) {
        if let Some(entry) = self.entries.get_mut(id as usize) {
            entry.state = WriteState::Done;
        }
    }

    /// Forget `id` and every id assigned after it.
    pub fn truncate(&mut self, id: u32) {
        for entry in self.entries.drain(id as usize..) {
            if let Some(key) = entry.value.identity() {
                self.ids.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
enum ReadSlot {
    Pending,
    Published(Value),
    Ready(Value),
}

/// Read side: id to reconstructed instance.
#[derive(Default)]
pub struct ReadIdentityTable {
    slots: Vec<ReadSlot>,
}

impl ReadIdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id before its object is decoded.
    pub fn reserve(&mut self) -> u32 {
        self.slots.push(ReadSlot::Pending);
        (self.slots.len() - 1) as u32
    }

    /// Expose a not-yet-complete instance for a reserved id.
    pub fn publish(&mut self, id: u32, value: Value) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            if matches!(slot, ReadSlot::Pending) {
                *slot = ReadSlot::Published(value);
            }
        }
    }

    pub fn finalize(&mut self, id: u32, value: Value) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = ReadSlot::Ready(value);
        }
    }

    /// Instance for a back-reference.
    pub fn resolve(&self, id: u32) -> FormatResult<Value> {
        match self.slots.get(id as usize) {
            None => Err(FormatError::DanglingReference(id)),
            Some(ReadSlot::Pending) => Err(FormatError::PendingReference(id)),
            Some(ReadSlot::Published(value)) | Some(ReadSlot::Ready(value)) => Ok(value.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
