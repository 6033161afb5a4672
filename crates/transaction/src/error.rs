use crate::table::RowId;
use chalkdb_engine::PlanError;
use chalkdb_rel::SchemaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("lock on {table}:{row_id} not acquired")]
    LockNotAcquired { table: String, row_id: RowId },
    #[error("write lock on {table}:{row_id} queued behind active readers")]
    WriteLockPending { table: String, row_id: RowId },
    #[error("deadlock avoided: lock order incorrect at {table}:{row_id}")]
    LockOrderViolation { table: String, row_id: RowId },
    #[error("another transaction is already waiting to write {table}:{row_id}")]
    PendingWriterConflict { table: String, row_id: RowId },
    #[error("row {row_id} not found in `{table}`")]
    RowNotFound { table: String, row_id: RowId },
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    #[error("table `{0}` already exists")]
    TableExists(String),
    #[error("`{column}` is not a column of `{table}`")]
    UnknownColumn { table: String, column: String },
    #[error("read after delete of {table}:{row_id}")]
    ReadAfterDelete { table: String, row_id: RowId },
    #[error("update after delete of {table}:{row_id}")]
    UpdateAfterDelete { table: String, row_id: RowId },
    #[error("commit validation failed: {anomaly} conflict on {table}:{row_id}")]
    ValidationFailed {
        table: String,
        row_id: RowId,
        anomaly: &'static str,
    },
    #[error("transaction is not running")]
    NotRunning,
    #[error("{isolation} is not supported by this transaction manager")]
    UnsupportedIsolation { isolation: crate::tx::IsolationLevel },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl TxError {
    /// Transient failures suspend the statement for deferred retry;
    /// everything else either aborted the transaction already or is a
    /// caller error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TxError::LockNotAcquired { .. } | TxError::WriteLockPending { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("statement {index}: could not parse `{text}`")]
    Parse { index: usize, text: String },
    #[error("statement {index}: transaction `{tx}` is already initialized")]
    DuplicateBegin { index: usize, tx: String },
    #[error("statement {index}: transaction `{tx}` used before BEGIN()")]
    MissingBegin { index: usize, tx: String },
}

#[derive(Error, Debug)]
pub enum DBError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl DBError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DBError::Tx(e) if e.is_transient())
    }
}
