//! The advisory lock table: per-(table, row) single-writer/multi-reader
//! records. All acquisitions are non-blocking; contention surfaces as a
//! failed acquire and is handled by the schedule executor's deferred
//! retry. Ownership is advisory: the records do not know who holds them,
//! and any caller may release.
//!
//! The map representation is an implementation detail kept behind this
//! interface; a concurrent table could be substituted without touching
//! the transaction code.

use crate::table::RowId;
use indexmap::IndexMap;

/// Lexicographically ordered (table, row) key; the ordering is what the
/// deadlock-avoidance check compares.
pub type LockKey = (String, RowId);

#[derive(Debug, Default)]
pub struct LockRecord {
    readers: u32,
    writer: bool,
    pending_writer: Option<u64>,
}

impl LockRecord {
    fn try_acquire_read(&mut self) -> bool {
        if self.writer {
            return false;
        }
        self.readers += 1;
        true
    }

    fn try_acquire_write(&mut self) -> bool {
        if self.writer || self.readers != 0 {
            return false;
        }
        self.writer = true;
        true
    }

    fn release_read(&mut self) {
        self.readers = self.readers.saturating_sub(1);
    }

    fn release_write(&mut self) {
        if self.writer {
            self.writer = false;
            // the next writer may register afresh
            self.pending_writer = None;
        }
    }

    /// Registers `requestor` as the single pending writer. Returns false
    /// when a different transaction is already waiting.
    fn wait_for_write(&mut self, requestor: u64) -> bool {
        match self.pending_writer {
            None => {
                self.pending_writer = Some(requestor);
                true
            }
            Some(current) => current == requestor,
        }
    }

    fn is_free(&self) -> bool {
        self.readers == 0 && !self.writer && self.pending_writer.is_none()
    }
}

#[derive(Debug, Default)]
pub struct LockTable {
    locks: IndexMap<LockKey, LockRecord>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeeds iff no writer is active on the key.
    pub fn try_acquire_read(&mut self, key: &LockKey) -> bool {
        self.locks.entry(key.clone()).or_default().try_acquire_read()
    }

    /// Succeeds iff the key has neither writer nor readers.
    pub fn try_acquire_write(&mut self, key: &LockKey) -> bool {
        let acquired = self.locks.entry(key.clone()).or_default().try_acquire_write();
        if !acquired {
            self.drop_if_free(key);
        }
        acquired
    }

    pub fn release_read(&mut self, key: &LockKey) {
        if let Some(record) = self.locks.get_mut(key) {
            record.release_read();
            self.drop_if_free(key);
        }
    }

    pub fn release_write(&mut self, key: &LockKey) {
        if let Some(record) = self.locks.get_mut(key) {
            record.release_write();
            self.drop_if_free(key);
        }
    }

    /// Registers `requestor` as the pending writer on `key`; false when
    /// another transaction already waits there.
    pub fn wait_for_write(&mut self, key: &LockKey, requestor: u64) -> bool {
        self.locks
            .entry(key.clone())
            .or_default()
            .wait_for_write(requestor)
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.locks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn drop_if_free(&mut self, key: &LockKey) {
        if self.locks.get(key).is_some_and(LockRecord::is_free) {
            self.locks.shift_remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(row: u64) -> LockKey {
        ("t".to_owned(), RowId(row))
    }

    #[test]
    fn readers_share_writers_exclude() {
        let mut locks = LockTable::new();
        assert!(locks.try_acquire_read(&key(0)));
        assert!(locks.try_acquire_read(&key(0)));
        assert!(!locks.try_acquire_write(&key(0)));
        locks.release_read(&key(0));
        assert!(!locks.try_acquire_write(&key(0)));
        locks.release_read(&key(0));
        assert!(locks.try_acquire_write(&key(0)));
        assert!(!locks.try_acquire_read(&key(0)));
        assert!(!locks.try_acquire_write(&key(0)));
    }

    #[test]
    fn fully_released_records_are_dropped() {
        let mut locks = LockTable::new();
        assert!(locks.try_acquire_write(&key(1)));
        assert!(locks.is_locked(&key(1)));
        locks.release_write(&key(1));
        assert!(!locks.is_locked(&key(1)));
        assert!(locks.is_empty());
    }

    #[test]
    fn single_pending_writer() {
        let mut locks = LockTable::new();
        assert!(locks.try_acquire_read(&key(0)));
        assert!(locks.wait_for_write(&key(0), 1));
        // re-registering is fine, a second transaction is refused
        assert!(locks.wait_for_write(&key(0), 1));
        assert!(!locks.wait_for_write(&key(0), 2));
        // releasing the write clears the pending registration
        locks.release_read(&key(0));
        assert!(locks.try_acquire_write(&key(0)));
        locks.release_write(&key(0));
        assert!(locks.wait_for_write(&key(0), 2));
    }

    #[test]
    fn lock_keys_order_by_table_then_row() {
        assert!(("a".to_owned(), RowId(5)) < ("b".to_owned(), RowId(0)));
        assert!(("a".to_owned(), RowId(0)) < ("a".to_owned(), RowId(5)));
    }
}
