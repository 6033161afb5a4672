//! Transaction processing over row-versioned tables: a pessimistic
//! lock-based protocol and multi-version optimistic concurrency control,
//! both driven by a schedule executor that interleaves named
//! transactions' statements and defers the ones that hit contention.
//!
//! Execution is single-threaded and cooperative; the lock table is an
//! advisory conflict model, not a thread synchronization primitive.

pub mod error;
pub mod lock;
mod locking;
pub mod manager;
mod mvcc;
pub mod precedence;
pub mod schedule;
pub mod table;
pub mod tx;

pub use error::{DBError, ScheduleError, TxError};
pub use lock::{LockKey, LockTable};
pub use manager::TransactionManager;
pub use precedence::{conflict_edges, precedence_graph};
pub use schedule::{execute_schedule, parse_schedule, ScheduleOutcome, ScheduledStatement, Statement};
pub use table::{Row, RowId, RowMap, Table, BEGIN_TS, END_TS, ROW_ID, TS_INFINITY};
pub use tx::{IsolationLevel, Transaction, TxStatus};
