//! Per-pause integer handles (frame ids and `variablesReference`s).
//!
//! Handles come from a counter that never goes backwards, so a handle
//! invalidated by a resume can never alias a newer one. Looking up an
//! invalidated handle is a [`DapError::StaleReference`].

use std::collections::HashMap;

use crate::error::DapError;

#[derive(Debug)]
struct Entry<T> {
    isolate_id: String,
    value: T,
}

/// Maps handles to values owned by one isolate's current pause.
#[derive(Debug)]
pub struct HandleTable<T> {
    next: i64,
    entries: HashMap<i64, Entry<T>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }

    /// Issue a new handle. Never returns 0, which DAP reserves for "no
    /// children".
    pub fn insert(&mut self, isolate_id: &str, value: T) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(
            handle,
            Entry {
                isolate_id: isolate_id.to_string(),
                value,
            },
        );
        handle
    }

    pub fn get(&self, handle: i64) -> Result<&T, DapError> {
        self.entries
            .get(&handle)
            .map(|e| &e.value)
            .ok_or(DapError::StaleReference(handle))
    }

    pub fn isolate_of(&self, handle: i64) -> Option<&str> {
        self.entries.get(&handle).map(|e| e.isolate_id.as_str())
    }

    /// Drop every handle belonging to `isolate_id`.
    pub fn invalidate_isolate(&mut self, isolate_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.isolate_id != isolate_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_at_one() {
        let mut table = HandleTable::new();
        assert_eq!(table.insert("isolates/1", "a"), 1);
        assert_eq!(table.insert("isolates/1", "b"), 2);
        assert_eq!(*table.get(2).unwrap(), "b");
        assert!(matches!(table.get(0), Err(DapError::StaleReference(0))));
    }

    #[test]
    fn invalidation_is_per_isolate() {
        let mut table = HandleTable::new();
        let a = table.insert("isolates/1", 10);
        let b = table.insert("isolates/2", 20);
        assert_eq!(table.invalidate_isolate("isolates/1"), 1);
        assert!(matches!(table.get(a), Err(DapError::StaleReference(h)) if h == a));
        assert_eq!(*table.get(b).unwrap(), 20);
        assert_eq!(table.isolate_of(b), Some("isolates/2"));
    }

    #[test]
    fn handles_are_never_reused() {
        let mut table = HandleTable::new();
        let first = table.insert("i", ());
        table.clear();
        let second = table.insert("i", ());
        assert!(second > first);
        assert!(table.get(first).is_err());
        assert_eq!(table.len(), 1);
    }
}
