//! The transaction manager: owns the table registry and the lock table,
//! mints timestamps and transaction handles, and dispatches operations to
//! the protocol the manager was configured with. All state is shared
//! mutable and single-threaded; transactions interleave cooperatively
//! under the schedule executor, never in parallel.

use crate::error::{DBError, TxError};
use crate::lock::LockTable;
use crate::locking;
use crate::mvcc;
use crate::table::{RowId, RowMap, Table, BEGIN_TS, END_TS, ROW_ID};
use crate::tx::{CommittedTx, IsolationLevel, LockingTx, MvccTx, Transaction, TxState, TxStatus};
use chalkdb_rel::{Domain, Schema, SchemaError};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::BTreeSet;

/// Committed transactions are kept for MVCC validation; once more than
/// this many are tracked, the list is pruned down to what active
/// transactions can still conflict with.
const COMMITTED_GC_THRESHOLD: usize = 10;

pub struct TransactionManager {
    isolation: IsolationLevel,
    use_mvcc: bool,
    tables: IndexMap<String, Table>,
    locks: LockTable,
    tx_id_gen: u64,
    ts_counter: i64,
    committed: Vec<CommittedTx>,
    active: BTreeSet<i64>,
}

impl TransactionManager {
    /// Creates a manager executing every transaction at `isolation`.
    /// MVCC supports only snapshot-isolation and serializable, and
    /// snapshot-isolation requires MVCC.
    pub fn new(isolation: IsolationLevel, use_mvcc: bool) -> Result<Self, DBError> {
        if use_mvcc
            && !matches!(
                isolation,
                IsolationLevel::SnapshotIsolation | IsolationLevel::Serializable
            )
        {
            return Err(TxError::UnsupportedIsolation { isolation }.into());
        }
        if isolation == IsolationLevel::SnapshotIsolation && !use_mvcc {
            return Err(TxError::UnsupportedIsolation { isolation }.into());
        }
        Ok(TransactionManager {
            isolation,
            use_mvcc,
            tables: IndexMap::new(),
            locks: LockTable::new(),
            tx_id_gen: 0,
            ts_counter: 0,
            committed: Vec::new(),
            active: BTreeSet::new(),
        })
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn uses_mvcc(&self) -> bool {
        self.use_mvcc
    }

    /// Registers a table. User attributes must avoid the reserved names;
    /// the manager prepends `row_id` (and `begin_ts`/`end_ts` in MVCC
    /// mode) to the schema.
    pub fn add_table(&mut self, name: &str, attributes: &[(&str, Domain)]) -> Result<(), DBError> {
        if self.tables.contains_key(name) {
            return Err(TxError::TableExists(name.to_owned()).into());
        }
        let mut reserved = vec![ROW_ID];
        if self.use_mvcc {
            reserved.extend([BEGIN_TS, END_TS]);
        }
        for (attr, _) in attributes {
            if reserved.contains(attr) {
                return Err(SchemaError::ReservedAttribute((*attr).to_owned()).into());
            }
        }

        let mut attrs: Vec<(String, Domain)> = vec![(ROW_ID.to_owned(), Domain::Int)];
        if self.use_mvcc {
            attrs.push((BEGIN_TS.to_owned(), Domain::Int));
            attrs.push((END_TS.to_owned(), Domain::Int));
        }
        attrs.extend(attributes.iter().map(|(n, d)| ((*n).to_owned(), *d)));

        let schema = Schema::new(attrs)?;
        log::debug!("table `{name}` registered: {schema}");
        self.tables
            .insert(name.to_owned(), Table::new(name, schema, self.use_mvcc));
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// All tables rendered one after another, current versions first.
    pub fn tables_display(&self) -> String {
        self.tables.values().map(|t| t.to_string()).join("\n")
    }

    /// Mints a transaction of the configured variant, running.
    pub fn begin_transaction(&mut self) -> Transaction {
        let state = if self.use_mvcc {
            self.ts_counter += 1;
            let begin_ts = self.ts_counter;
            self.active.insert(begin_ts);
            log::trace!("mvcc tx begun at ts {begin_ts}");
            TxState::Mvcc(MvccTx::new(begin_ts))
        } else {
            self.tx_id_gen += 1;
            log::trace!("locking tx {} begun", self.tx_id_gen);
            TxState::Locking(LockingTx::new(self.tx_id_gen))
        };
        Transaction {
            status: TxStatus::Running,
            isolation: self.isolation,
            state,
        }
    }

    pub fn read(
        &mut self,
        tx: &mut Transaction,
        table: &str,
        row_id: RowId,
    ) -> Result<RowMap, DBError> {
        self.check_runnable(tx, table)?;
        let result = match &mut tx.state {
            TxState::Locking(st) => locking::read(
                st,
                &mut tx.status,
                tx.isolation,
                &mut self.tables,
                &mut self.locks,
                table,
                row_id,
            ),
            TxState::Mvcc(st) => mvcc::read(st, &mut tx.status, &self.tables, table, row_id),
        };
        Ok(result?)
    }

    pub fn update(
        &mut self,
        tx: &mut Transaction,
        table: &str,
        row_id: RowId,
        values: &RowMap,
    ) -> Result<RowMap, DBError> {
        self.check_runnable(tx, table)?;
        let result = match &mut tx.state {
            TxState::Locking(st) => locking::update(
                st,
                &mut tx.status,
                &mut self.tables,
                &mut self.locks,
                table,
                row_id,
                values,
            ),
            TxState::Mvcc(st) => {
                mvcc::update(st, &mut tx.status, &self.tables, table, row_id, values)
            }
        };
        Ok(result?)
    }

    pub fn insert(
        &mut self,
        tx: &mut Transaction,
        table: &str,
        values: &RowMap,
    ) -> Result<RowId, DBError> {
        self.check_runnable(tx, table)?;
        let result = match &mut tx.state {
            TxState::Locking(st) => locking::insert(
                st,
                &mut tx.status,
                &mut self.tables,
                &mut self.locks,
                table,
                values,
            ),
            TxState::Mvcc(st) => mvcc::insert(st, &mut tx.status, &mut self.tables, table, values),
        };
        Ok(result?)
    }

    pub fn delete(
        &mut self,
        tx: &mut Transaction,
        table: &str,
        row_id: RowId,
    ) -> Result<(), DBError> {
        self.check_runnable(tx, table)?;
        let result = match &mut tx.state {
            TxState::Locking(st) => locking::delete(
                st,
                &mut tx.status,
                &mut self.tables,
                &mut self.locks,
                table,
                row_id,
            ),
            TxState::Mvcc(st) => mvcc::delete(st, &mut tx.status, &self.tables, table, row_id),
        };
        Ok(result?)
    }

    /// Commits `tx`. Returns whether the commit went through: an MVCC
    /// validation failure rolls the transaction back and reports `false`
    /// rather than an error, matching the executor's retry contract.
    pub fn commit_transaction(&mut self, tx: &mut Transaction) -> Result<bool, DBError> {
        match &mut tx.state {
            TxState::Locking(st) => Ok(locking::commit(st, &mut tx.status, &mut self.locks)),
            TxState::Mvcc(st) => {
                if tx.status != TxStatus::Running {
                    return Ok(false);
                }
                self.active.remove(&st.begin_ts);
                if self.committed.len() > COMMITTED_GC_THRESHOLD {
                    self.collect_committed();
                }
                self.ts_counter += 1;
                let commit_ts = self.ts_counter;
                match mvcc::commit(
                    st,
                    &mut tx.status,
                    tx.isolation,
                    &mut self.tables,
                    &self.committed,
                    commit_ts,
                ) {
                    Ok(()) => {
                        self.committed.push(CommittedTx {
                            commit_ts,
                            write_set: st.write_set.clone(),
                        });
                        log::trace!("mvcc tx (begin {}) committed at {commit_ts}", st.begin_ts);
                        Ok(true)
                    }
                    Err(err @ TxError::ValidationFailed { .. }) => {
                        log::debug!("mvcc commit at {commit_ts} rejected: {err}");
                        Ok(false)
                    }
                    Err(other) => Err(other.into()),
                }
            }
        }
    }

    pub fn abort_transaction(&mut self, tx: &mut Transaction) {
        match &mut tx.state {
            TxState::Locking(st) => {
                locking::rollback(st, &mut tx.status, &mut self.tables, &mut self.locks)
            }
            TxState::Mvcc(st) => {
                self.active.remove(&st.begin_ts);
                mvcc::rollback(st, &mut tx.status);
            }
        }
    }

    /// Drops committed transactions no active transaction can conflict
    /// with. With nothing active, nothing can conflict at all.
    fn collect_committed(&mut self) {
        let before = self.committed.len();
        match self.active.iter().next().copied() {
            Some(min_active) => self.committed.retain(|t| t.commit_ts > min_active),
            None => self.committed.clear(),
        }
        log::trace!(
            "pruned committed-transaction list {before} -> {}",
            self.committed.len()
        );
    }

    #[cfg(test)]
    pub(crate) fn committed_len(&self) -> usize {
        self.committed.len()
    }

    fn check_runnable(&self, tx: &Transaction, table: &str) -> Result<(), DBError> {
        if !tx.is_running() {
            return Err(TxError::NotRunning.into());
        }
        if !self.tables.contains_key(table) {
            return Err(TxError::UnknownTable(table.to_owned()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkdb_rel::Value;

    fn mvcc_manager() -> TransactionManager {
        let mut manager =
            TransactionManager::new(IsolationLevel::SnapshotIsolation, true).unwrap();
        manager.add_table("t", &[("v", Domain::Int)]).unwrap();
        manager
    }

    fn run_one(manager: &mut TransactionManager) {
        let mut tx = manager.begin_transaction();
        let mut values = RowMap::new();
        values.insert("v".to_owned(), Value::Int(0));
        manager.insert(&mut tx, "t", &values).unwrap();
        assert!(manager.commit_transaction(&mut tx).unwrap());
    }

    #[test]
    fn committed_list_is_cleared_once_nothing_is_active() {
        let mut manager = mvcc_manager();
        for _ in 0..12 {
            run_one(&mut manager);
        }
        // the 12th commit found 11 tracked transactions and, with no
        // active snapshot left, dropped them all before appending itself
        assert_eq!(manager.committed_len(), 1);
    }

    #[test]
    fn committed_list_is_kept_while_an_old_snapshot_is_active() {
        let mut manager = mvcc_manager();
        let mut old = manager.begin_transaction();
        for _ in 0..12 {
            run_one(&mut manager);
        }
        // everything committed after `old` began is still needed
        assert_eq!(manager.committed_len(), 12);
        manager.abort_transaction(&mut old);
    }

    #[test]
    fn timestamps_increase_monotonically() {
        let mut manager = mvcc_manager();
        let t1 = manager.begin_transaction();
        let t2 = manager.begin_transaction();
        assert!(t1.begin_ts().unwrap() < t2.begin_ts().unwrap());
    }
}
