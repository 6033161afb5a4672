//! Transaction handles and their per-protocol state. Operations live on
//! the [`crate::manager::TransactionManager`], which owns the shared
//! tables and lock registry; a `Transaction` only carries what is local
//! to it.

use crate::lock::LockKey;
use crate::table::{RowId, RowMap, Row, TS_INFINITY};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableReads,
    Serializable,
    SnapshotIsolation,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableReads => "repeatable-reads",
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::SnapshotIsolation => "snapshot-isolation",
        })
    }
}

/// Terminal states are sticky: once committed or aborted, a transaction
/// never runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Running,
    Committed,
    Aborted,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxStatus::Running => "running",
            TxStatus::Committed => "committed",
            TxStatus::Aborted => "aborted",
        })
    }
}

#[derive(Debug)]
pub struct Transaction {
    pub(crate) status: TxStatus,
    pub(crate) isolation: IsolationLevel,
    pub(crate) state: TxState,
}

impl Transaction {
    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_running(&self) -> bool {
        self.status == TxStatus::Running
    }

    /// The snapshot timestamp, for MVCC transactions.
    pub fn begin_ts(&self) -> Option<i64> {
        match &self.state {
            TxState::Mvcc(st) => Some(st.begin_ts),
            TxState::Locking(_) => None,
        }
    }

    /// The numeric identity used for pending-writer registration, for
    /// lock-based transactions.
    pub fn tx_id(&self) -> Option<u64> {
        match &self.state {
            TxState::Locking(st) => Some(st.tx_id),
            TxState::Mvcc(_) => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum TxState {
    Locking(LockingTx),
    Mvcc(MvccTx),
}

/// Local state of a lock-based transaction over single-version tables.
#[derive(Debug)]
pub(crate) struct LockingTx {
    pub(crate) tx_id: u64,
    /// Keys of currently held read locks.
    pub(crate) read_locks: Vec<LockKey>,
    /// Keys of currently held write locks.
    pub(crate) write_locks: Vec<LockKey>,
    /// Reads cached for repeatable-reads and serializable.
    pub(crate) local_reads: HashMap<LockKey, RowMap>,
    /// The largest key locked so far; acquiring below it aborts.
    pub(crate) last_lock: Option<LockKey>,
    /// Pre-images of rows this transaction overwrote or deleted, for
    /// rollback. A written key with no entry here was inserted by this
    /// transaction.
    pub(crate) original_rows: HashMap<LockKey, Row>,
}

impl LockingTx {
    pub(crate) fn new(tx_id: u64) -> Self {
        LockingTx {
            tx_id,
            read_locks: Vec::new(),
            write_locks: Vec::new(),
            local_reads: HashMap::new(),
            last_lock: None,
            original_rows: HashMap::new(),
        }
    }
}

/// Local state of an MVCC transaction over multi-version tables. All
/// writes are staged here and only reach the shared tables at commit.
#[derive(Debug)]
pub(crate) struct MvccTx {
    pub(crate) begin_ts: i64,
    pub(crate) commit_ts: i64,
    pub(crate) read_set: BTreeSet<LockKey>,
    pub(crate) write_set: BTreeSet<LockKey>,
    /// Staged updates/inserts/deletion markers, keyed by (table, row).
    pub(crate) local_updates: IndexMap<LockKey, RowMap>,
}

impl MvccTx {
    pub(crate) fn new(begin_ts: i64) -> Self {
        MvccTx {
            begin_ts,
            commit_ts: TS_INFINITY,
            read_set: BTreeSet::new(),
            write_set: BTreeSet::new(),
            local_updates: IndexMap::new(),
        }
    }
}

/// A committed transaction kept around for MVCC validation.
#[derive(Debug)]
pub(crate) struct CommittedTx {
    pub(crate) commit_ts: i64,
    pub(crate) write_set: BTreeSet<LockKey>,
}

/// Convenience constructor for lock keys.
pub(crate) fn lock_key(table: &str, row_id: RowId) -> LockKey {
    (table.to_owned(), row_id)
}
