//! In-memory dead-letter queue.
//!
//! Append-only until an operator drains it with `clear`, which hands back
//! exactly what it removed. Unbounded; entries are never dropped or expired.

use std::sync::Mutex;

use bulwark_types::resilience::DeadLetterEntry;

#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: DeadLetterEntry) {
        self.entries
            .lock()
            .expect("dead letter lock poisoned")
            .push(entry);
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .expect("dead letter lock poisoned")
            .clone()
    }

    /// Remove and return every entry.
    pub fn clear(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.entries.lock().expect("dead letter lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dead letter lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
