//! Correlation table: in-flight request ids mapped to their pending state.
//!
//! The table itself holds no locks; its owner serializes access. Every
//! operation that removes an entry hands the entry back by value, so whoever
//! removed it is the only party able to settle it.

use std::collections::HashMap;

use thiserror::Error;

/// Why an entry could not be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// Another entry with the same id is still pending.
    #[error("correlation id '{0}' is already pending")]
    Duplicate(String),

    /// The table was drained and accepts no new entries.
    #[error("correlation table is closed")]
    Closed,
}

/// A rejected insertion, returning the entry to its owner.
#[derive(Debug)]
pub struct Rejected<E> {
    /// Why the entry was rejected.
    pub error: CorrelationError,
    /// The entry that was not inserted.
    pub entry: E,
}

/// Mapping from correlation id to pending entry.
#[derive(Debug)]
pub struct CorrelationTable<E> {
    entries: HashMap<String, E>,
    closed: bool,
}

impl<E> Default for CorrelationTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> CorrelationTable<E> {
    /// Creates an empty, open table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            closed: false,
        }
    }

    /// Inserts `entry` under `id`.
    ///
    /// An existing entry is never overwritten; a duplicate id or a closed
    /// table returns the new entry inside [`Rejected`].
    pub fn insert(&mut self, id: impl Into<String>, entry: E) -> Result<(), Rejected<E>> {
        if self.closed {
            return Err(Rejected {
                error: CorrelationError::Closed,
                entry,
            });
        }

        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(Rejected {
                error: CorrelationError::Duplicate(id),
                entry,
            });
        }

        self.entries.insert(id, entry);
        Ok(())
    }

    /// Removes and returns the entry for `id`, if still pending.
    pub fn take(&mut self, id: &str) -> Option<E> {
        self.entries.remove(id)
    }

    /// Removes every entry and closes the table.
    pub fn drain_all(&mut self) -> Vec<(String, E)> {
        self.closed = true;
        self.entries.drain().collect()
    }

    /// Returns true if `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once [`drain_all`](Self::drain_all) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
