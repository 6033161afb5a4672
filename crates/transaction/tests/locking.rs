use chalkdb_rel::{Domain, Value};
use chalkdb_transaction::error::{DBError, TxError};
use chalkdb_transaction::{IsolationLevel, RowId, RowMap, TransactionManager, TxStatus};
use pretty_assertions::assert_eq;

fn vals(pairs: &[(&str, Value)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

/// A single-version `accounts` table with rows 0 and 1.
fn manager_with_accounts(isolation: IsolationLevel) -> TransactionManager {
    let mut manager = TransactionManager::new(isolation, false).unwrap();
    manager
        .add_table("accounts", &[("balance", Domain::Int)])
        .unwrap();
    let mut seed = manager.begin_transaction();
    manager
        .insert(&mut seed, "accounts", &vals(&[("balance", Value::Int(100))]))
        .unwrap();
    manager
        .insert(&mut seed, "accounts", &vals(&[("balance", Value::Int(200))]))
        .unwrap();
    assert!(manager.commit_transaction(&mut seed).unwrap());
    manager
}

fn balance(manager: &TransactionManager, row: u64) -> i64 {
    let table = manager.table("accounts").unwrap();
    let row = table.current_version(RowId(row)).unwrap();
    let idx = table.schema().index_of("balance").unwrap();
    row[idx].as_int().unwrap()
}

#[test]
fn reserved_attributes_are_rejected() {
    let mut manager = TransactionManager::new(IsolationLevel::ReadCommitted, false).unwrap();
    assert!(manager.add_table("t", &[("row_id", Domain::Int)]).is_err());
    manager.add_table("t", &[("a", Domain::Int)]).unwrap();
    assert!(matches!(
        manager.add_table("t", &[("a", Domain::Int)]),
        Err(DBError::Tx(TxError::TableExists(_)))
    ));
    // begin_ts is only reserved in mvcc mode
    manager
        .add_table("u", &[("begin_ts", Domain::Int)])
        .unwrap();
}

#[test]
fn snapshot_isolation_requires_mvcc() {
    assert!(TransactionManager::new(IsolationLevel::SnapshotIsolation, false).is_err());
    assert!(TransactionManager::new(IsolationLevel::ReadCommitted, true).is_err());
    assert!(TransactionManager::new(IsolationLevel::Serializable, true).is_ok());
}

#[test]
fn read_uncommitted_sees_dirty_writes() {
    let mut manager = manager_with_accounts(IsolationLevel::ReadUncommitted);
    let mut t1 = manager.begin_transaction();
    let mut t2 = manager.begin_transaction();

    manager
        .update(&mut t1, "accounts", RowId(0), &vals(&[("balance", Value::Int(1))]))
        .unwrap();
    // t1 has not committed, yet t2 observes the write
    let row = manager.read(&mut t2, "accounts", RowId(0)).unwrap();
    assert_eq!(row.get("balance"), Some(&Value::Int(1)));

    manager.abort_transaction(&mut t1);
    let row = manager.read(&mut t2, "accounts", RowId(0)).unwrap();
    assert_eq!(row.get("balance"), Some(&Value::Int(100)));
}

#[test]
fn read_committed_releases_the_lock_and_rereads() {
    let mut manager = manager_with_accounts(IsolationLevel::ReadCommitted);
    let mut t1 = manager.begin_transaction();
    let mut t2 = manager.begin_transaction();

    let first = manager.read(&mut t1, "accounts", RowId(0)).unwrap();
    assert_eq!(first.get("balance"), Some(&Value::Int(100)));

    // the read lock was released immediately, so t2 can write and commit
    manager
        .update(&mut t2, "accounts", RowId(0), &vals(&[("balance", Value::Int(7))]))
        .unwrap();
    assert!(manager.commit_transaction(&mut t2).unwrap());

    // non-repeatable read: t1 now sees the new value
    let second = manager.read(&mut t1, "accounts", RowId(0)).unwrap();
    assert_eq!(second.get("balance"), Some(&Value::Int(7)));
}

#[test]
fn repeatable_reads_holds_locks_and_caches() {
    let mut manager = manager_with_accounts(IsolationLevel::RepeatableReads);
    let mut t1 = manager.begin_transaction();
    let mut t2 = manager.begin_transaction();

    let first = manager.read(&mut t1, "accounts", RowId(0)).unwrap();
    assert_eq!(first.get("balance"), Some(&Value::Int(100)));

    // t1 keeps its read lock, so t2's upgrade queues as pending writer
    let err = manager
        .update(&mut t2, "accounts", RowId(0), &vals(&[("balance", Value::Int(7))]))
        .unwrap_err();
    assert!(err.is_transient());
    assert!(t2.is_running());

    // repeated reads come from the local cache
    let second = manager.read(&mut t1, "accounts", RowId(0)).unwrap();
    assert_eq!(second, first);

    assert!(manager.commit_transaction(&mut t1).unwrap());
    // with t1 gone the deferred update goes through
    manager
        .update(&mut t2, "accounts", RowId(0), &vals(&[("balance", Value::Int(7))]))
        .unwrap();
    assert!(manager.commit_transaction(&mut t2).unwrap());
    assert_eq!(balance(&manager, 0), 7);
}

#[test]
fn pending_writer_preemption_aborts_the_second_upgrader() {
    let mut manager = manager_with_accounts(IsolationLevel::RepeatableReads);
    let mut t1 = manager.begin_transaction();
    let mut t2 = manager.begin_transaction();

    manager.read(&mut t1, "accounts", RowId(0)).unwrap();
    manager.read(&mut t2, "accounts", RowId(0)).unwrap();

    // t1 queues as the pending writer behind t2's read lock
    let err = manager
        .update(&mut t1, "accounts", RowId(0), &vals(&[("balance", Value::Int(110))]))
        .unwrap_err();
    assert!(matches!(err, DBError::Tx(TxError::WriteLockPending { .. })));
    assert!(t1.is_running());

    // t2's own upgrade finds another pending writer and rolls back
    let err = manager
        .update(&mut t2, "accounts", RowId(0), &vals(&[("balance", Value::Int(120))]))
        .unwrap_err();
    assert!(matches!(err, DBError::Tx(TxError::PendingWriterConflict { .. })));
    assert_eq!(t2.status(), TxStatus::Aborted);

    // t2's rollback released its read lock; t1's retry succeeds
    manager
        .update(&mut t1, "accounts", RowId(0), &vals(&[("balance", Value::Int(110))]))
        .unwrap();
    assert!(manager.commit_transaction(&mut t1).unwrap());
    assert_eq!(balance(&manager, 0), 110);
}

#[test]
fn lock_order_violation_rolls_back() {
    let mut manager = manager_with_accounts(IsolationLevel::Serializable);
    let mut t = manager.begin_transaction();

    manager
        .update(&mut t, "accounts", RowId(1), &vals(&[("balance", Value::Int(201))]))
        .unwrap();
    // row 0 orders below row 1: deadlock avoidance kicks in
    let err = manager
        .update(&mut t, "accounts", RowId(0), &vals(&[("balance", Value::Int(101))]))
        .unwrap_err();
    assert!(matches!(err, DBError::Tx(TxError::LockOrderViolation { .. })));
    assert_eq!(t.status(), TxStatus::Aborted);

    // the first update was rolled back with it
    assert_eq!(balance(&manager, 1), 200);
}

#[test]
fn rollback_restores_update_and_delete_preimages() {
    let mut manager = manager_with_accounts(IsolationLevel::RepeatableReads);
    let mut t = manager.begin_transaction();

    manager
        .update(&mut t, "accounts", RowId(0), &vals(&[("balance", Value::Int(-5))]))
        .unwrap();
    manager.delete(&mut t, "accounts", RowId(1)).unwrap();
    assert!(manager.table("accounts").unwrap().get(RowId(1)).is_empty());

    manager.abort_transaction(&mut t);
    assert_eq!(t.status(), TxStatus::Aborted);

    assert_eq!(balance(&manager, 0), 100);
    assert_eq!(balance(&manager, 1), 200);
    assert_eq!(manager.table("accounts").unwrap().live_rows(), 2);

    // the restored row id must not be handed out again
    let mut t2 = manager.begin_transaction();
    let fresh = manager
        .insert(&mut t2, "accounts", &vals(&[("balance", Value::Int(3))]))
        .unwrap();
    assert_eq!(fresh, RowId(2));
}

#[test]
fn rollback_deletes_rows_inserted_by_the_transaction() {
    let mut manager = manager_with_accounts(IsolationLevel::RepeatableReads);
    let mut t = manager.begin_transaction();

    manager
        .update(&mut t, "accounts", RowId(0), &vals(&[("balance", Value::Int(-5))]))
        .unwrap();
    let new_row = manager
        .insert(&mut t, "accounts", &vals(&[("balance", Value::Int(3))]))
        .unwrap();
    assert_eq!(new_row, RowId(2));

    manager.abort_transaction(&mut t);
    assert_eq!(balance(&manager, 0), 100);
    assert!(manager.table("accounts").unwrap().get(RowId(2)).is_empty());
    assert_eq!(manager.table("accounts").unwrap().live_rows(), 2);
}

#[test]
fn update_with_unknown_attribute_aborts() {
    let mut manager = manager_with_accounts(IsolationLevel::ReadCommitted);
    let mut t = manager.begin_transaction();
    let err = manager
        .update(&mut t, "accounts", RowId(0), &vals(&[("missing", Value::Int(1))]))
        .unwrap_err();
    assert!(matches!(err, DBError::Tx(TxError::UnknownColumn { .. })));
    assert_eq!(t.status(), TxStatus::Aborted);
}

#[test]
fn operations_after_commit_are_rejected() {
    let mut manager = manager_with_accounts(IsolationLevel::ReadCommitted);
    let mut t = manager.begin_transaction();
    assert!(manager.commit_transaction(&mut t).unwrap());
    assert!(matches!(
        manager.read(&mut t, "accounts", RowId(0)),
        Err(DBError::Tx(TxError::NotRunning))
    ));
    // terminal states are sticky
    assert!(!manager.commit_transaction(&mut t).unwrap());
    manager.abort_transaction(&mut t);
    assert_eq!(t.status(), TxStatus::Committed);
}

#[test]
fn deleted_row_ids_are_reused_after_commit() {
    let mut manager = manager_with_accounts(IsolationLevel::ReadCommitted);
    let mut t = manager.begin_transaction();
    manager.delete(&mut t, "accounts", RowId(0)).unwrap();
    assert!(manager.commit_transaction(&mut t).unwrap());

    let mut t2 = manager.begin_transaction();
    let reused = manager
        .insert(&mut t2, "accounts", &vals(&[("balance", Value::Int(1))]))
        .unwrap();
    assert_eq!(reused, RowId(0));
    assert!(manager.commit_transaction(&mut t2).unwrap());
    assert_eq!(balance(&manager, 0), 1);
}
