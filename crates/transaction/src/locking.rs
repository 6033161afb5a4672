//! The lock-based protocol: read-uncommitted, read-committed,
//! repeatable-reads and serializable over single-version tables.
//!
//! Deadlocks are avoided rather than detected: lock keys are totally
//! ordered and a transaction that tries to lock below its high-water mark
//! rolls back immediately. Write locks upgrade from read locks; a failed
//! upgrade registers the transaction as the key's single pending writer
//! and suspends, unless another writer is already waiting, which aborts.

use crate::error::TxError;
use crate::lock::{LockKey, LockTable};
use crate::table::{RowId, RowMap, Table, ROW_ID};
use crate::tx::{lock_key, IsolationLevel, LockingTx, TxStatus};
use chalkdb_rel::Value;
use indexmap::IndexMap;

type Tables = IndexMap<String, Table>;

fn order_violation(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    key: &LockKey,
) -> TxError {
    log::debug!("tx {}: deadlock avoided, lock order incorrect at {}:{}", st.tx_id, key.0, key.1);
    rollback(st, status, tables, locks);
    TxError::LockOrderViolation {
        table: key.0.clone(),
        row_id: key.1,
    }
}

fn acquire_read(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    key: &LockKey,
) -> Result<(), TxError> {
    if st.last_lock.as_ref().is_some_and(|last| key < last) {
        return Err(order_violation(st, status, tables, locks, key));
    }
    if st.read_locks.contains(key) || st.write_locks.contains(key) {
        return Ok(());
    }
    if locks.try_acquire_read(key) {
        st.last_lock = Some(key.clone());
        st.read_locks.push(key.clone());
        Ok(())
    } else {
        Err(TxError::LockNotAcquired {
            table: key.0.clone(),
            row_id: key.1,
        })
    }
}

fn acquire_write(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    key: &LockKey,
) -> Result<(), TxError> {
    if st.last_lock.as_ref().is_some_and(|last| key < last) {
        return Err(order_violation(st, status, tables, locks, key));
    }
    if st.write_locks.contains(key) {
        return Ok(());
    }
    if st.read_locks.contains(key) {
        // upgrade: drop the read lock, try the write lock, and on failure
        // take the read lock back and queue as the pending writer
        locks.release_read(key);
        if locks.try_acquire_write(key) {
            st.read_locks.retain(|k| k != key);
            st.write_locks.push(key.clone());
            return Ok(());
        }
        locks.try_acquire_read(key);
        if locks.wait_for_write(key, st.tx_id) {
            Err(TxError::WriteLockPending {
                table: key.0.clone(),
                row_id: key.1,
            })
        } else {
            rollback(st, status, tables, locks);
            Err(TxError::PendingWriterConflict {
                table: key.0.clone(),
                row_id: key.1,
            })
        }
    } else if locks.try_acquire_write(key) {
        st.last_lock = Some(key.clone());
        st.write_locks.push(key.clone());
        Ok(())
    } else {
        Err(TxError::LockNotAcquired {
            table: key.0.clone(),
            row_id: key.1,
        })
    }
}

pub(crate) fn read(
    st: &mut LockingTx,
    status: &mut TxStatus,
    isolation: IsolationLevel,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    row_id: RowId,
) -> Result<RowMap, TxError> {
    match isolation {
        IsolationLevel::ReadUncommitted => read_latest(tables, table, row_id),
        IsolationLevel::ReadCommitted => {
            read_locked(st, status, tables, locks, table, row_id, true)
        }
        // repeatable-reads and serializable both hold their read locks
        // until commit and serve repeated reads from the local cache;
        // without range locking the two behave identically here
        IsolationLevel::RepeatableReads | IsolationLevel::Serializable => {
            read_cached(st, status, tables, locks, table, row_id)
        }
        IsolationLevel::SnapshotIsolation => Err(TxError::UnsupportedIsolation {
            isolation: IsolationLevel::SnapshotIsolation,
        }),
    }
}

/// No locks at all: the most recent version, committed or not.
fn read_latest(tables: &Tables, table: &str, row_id: RowId) -> Result<RowMap, TxError> {
    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    match tbl.current_version(row_id) {
        Some(row) => Ok(tbl.row_to_map(row)),
        None => Err(TxError::RowNotFound {
            table: table.to_owned(),
            row_id,
        }),
    }
}

/// Takes the read lock, reads the latest committed version, and (for
/// read-committed) releases the lock again right away.
fn read_locked(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    row_id: RowId,
    release_lock: bool,
) -> Result<RowMap, TxError> {
    let key = lock_key(table, row_id);
    acquire_read(st, status, tables, locks, &key)?;
    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    match tbl.current_version(row_id) {
        Some(row) => {
            let map = tbl.row_to_map(row);
            if release_lock {
                locks.release_read(&key);
                st.read_locks.retain(|k| k != &key);
            }
            Ok(map)
        }
        None => Err(TxError::RowNotFound {
            table: table.to_owned(),
            row_id,
        }),
    }
}

/// Repeatable reads: the first read of a key goes through the lock table
/// and is cached; later reads of the same key return the cached row.
fn read_cached(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    row_id: RowId,
) -> Result<RowMap, TxError> {
    let key = lock_key(table, row_id);
    if let Some(cached) = st.local_reads.get(&key) {
        return Ok(cached.clone());
    }
    let map = read_locked(st, status, tables, locks, table, row_id, false)?;
    st.local_reads.insert(key, map.clone());
    Ok(map)
}

pub(crate) fn update(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    row_id: RowId,
    values: &RowMap,
) -> Result<RowMap, TxError> {
    let key = lock_key(table, row_id);
    acquire_write(st, status, tables, locks, &key)?;

    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    let current = match tbl.current_version(row_id) {
        Some(row) => row.clone(),
        None => {
            return Err(TxError::RowNotFound {
                table: table.to_owned(),
                row_id,
            })
        }
    };

    let mut values = values.clone();
    values.insert(ROW_ID.to_owned(), Value::Int(row_id.0 as i64));
    let new_row = match tbl.map_to_row(&values, current.clone()) {
        Ok(row) => row,
        Err(err) => {
            // a write against attributes the table does not have (or with
            // the wrong domain) is fatal to the transaction
            rollback(st, status, tables, locks);
            return Err(err);
        }
    };

    st.original_rows.entry(key).or_insert(current);
    let tbl = tables.get_mut(table).expect("checked above");
    tbl.put(new_row.clone())?;
    Ok(tbl.row_to_map(&new_row))
}

pub(crate) fn insert(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    values: &RowMap,
) -> Result<RowId, TxError> {
    let tbl = tables
        .get_mut(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    // lock ordering cannot hold for inserts: the id is whatever the free
    // list hands out
    let row_id = tbl.next_row_id();
    let key = lock_key(table, row_id);
    acquire_write(st, status, tables, locks, &key)?;

    let tbl = tables.get(table).expect("checked above");
    let mut values = values.clone();
    values.insert(ROW_ID.to_owned(), Value::Int(row_id.0 as i64));
    let row = match tbl.map_to_full_row(&values) {
        Ok(row) => row,
        Err(err) => {
            rollback(st, status, tables, locks);
            return Err(err);
        }
    };
    tables.get_mut(table).expect("checked above").put(row)?;
    Ok(row_id)
}

pub(crate) fn delete(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
    table: &str,
    row_id: RowId,
) -> Result<(), TxError> {
    let key = lock_key(table, row_id);
    acquire_write(st, status, tables, locks, &key)?;

    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    let current = match tbl.current_version(row_id) {
        Some(row) => row.clone(),
        None => {
            return Err(TxError::RowNotFound {
                table: table.to_owned(),
                row_id,
            })
        }
    };
    st.original_rows.entry(key).or_insert(current);
    tables.get_mut(table).expect("checked above").delete(row_id);
    Ok(())
}

/// Releases every lock and marks the transaction committed. Returns
/// whether the transaction was still running.
pub(crate) fn commit(st: &mut LockingTx, status: &mut TxStatus, locks: &mut LockTable) -> bool {
    if *status != TxStatus::Running {
        return false;
    }
    *status = TxStatus::Committed;
    for key in st.read_locks.drain(..) {
        locks.release_read(&key);
    }
    for key in st.write_locks.drain(..) {
        locks.release_write(&key);
    }
    log::trace!("tx {}: committed", st.tx_id);
    true
}

/// Restores every pre-image (or deletes rows this transaction inserted),
/// releases all locks, and marks the transaction aborted.
pub(crate) fn rollback(
    st: &mut LockingTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    locks: &mut LockTable,
) {
    if *status != TxStatus::Running {
        return;
    }
    *status = TxStatus::Aborted;
    for key in st.read_locks.drain(..) {
        locks.release_read(&key);
    }
    for key in st.write_locks.drain(..) {
        let (table, row_id) = (&key.0, key.1);
        if let Some(tbl) = tables.get_mut(table) {
            match st.original_rows.remove(&key) {
                Some(row) => {
                    // the lock is still held; the put cannot interleave
                    let _ = tbl.put(row);
                }
                None => tbl.delete(row_id),
            }
        }
        locks.release_write(&key);
    }
    log::trace!("tx {}: rolled back", st.tx_id);
}
