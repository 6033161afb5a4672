//! Multi-version optimistic concurrency control: snapshot isolation and
//! serializable over multi-version tables.
//!
//! Reads see the version visible at the transaction's `begin_ts` and take
//! no locks. Writes stage locally and only reach the shared tables at
//! commit, after validation against every transaction that committed in
//! between: overlapping write sets abort, and under serializable an
//! overlap between this transaction's read set and the other's write set
//! aborts too.

use crate::error::TxError;
use crate::table::{RowId, RowMap, Table, BEGIN_TS, END_TS, ROW_ID, TS_INFINITY};
use crate::tx::{lock_key, CommittedTx, IsolationLevel, MvccTx, TxStatus};
use chalkdb_rel::Value;
use indexmap::IndexMap;

type Tables = IndexMap<String, Table>;

fn ts_field(map: &RowMap, field: &str) -> i64 {
    map.get(field).and_then(Value::as_int).unwrap_or(TS_INFINITY)
}

/// Whether a stored version is visible at snapshot time `ts`.
fn visible_at(table: &Table, row: &[Value], ts: i64) -> bool {
    let begin = table
        .schema()
        .index_of(BEGIN_TS)
        .and_then(|i| row[i].as_int())
        .unwrap_or(TS_INFINITY);
    let end = table
        .schema()
        .index_of(END_TS)
        .and_then(|i| row[i].as_int())
        .unwrap_or(TS_INFINITY);
    begin <= ts && ts < end
}

pub(crate) fn read(
    st: &mut MvccTx,
    status: &mut TxStatus,
    tables: &Tables,
    table: &str,
    row_id: RowId,
) -> Result<RowMap, TxError> {
    let key = lock_key(table, row_id);
    if let Some(local) = st.local_updates.get(&key) {
        // reads of our own staged writes, including staged deletions
        if ts_field(local, END_TS) > st.begin_ts {
            return Ok(local.clone());
        }
        rollback(st, status);
        return Err(TxError::ReadAfterDelete {
            table: table.to_owned(),
            row_id,
        });
    }

    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    for version in tbl.get(row_id) {
        if visible_at(tbl, version, st.begin_ts) {
            st.read_set.insert(key);
            return Ok(tbl.row_to_map(version));
        }
    }

    // no visible version: the row never existed for this snapshot
    rollback(st, status);
    Err(TxError::RowNotFound {
        table: table.to_owned(),
        row_id,
    })
}

pub(crate) fn update(
    st: &mut MvccTx,
    status: &mut TxStatus,
    tables: &Tables,
    table: &str,
    row_id: RowId,
    values: &RowMap,
) -> Result<RowMap, TxError> {
    let key = lock_key(table, row_id);
    let mut version = match st.local_updates.get(&key) {
        Some(local) => local.clone(),
        None => read(st, status, tables, table, row_id)?,
    };

    if ts_field(&version, END_TS) <= st.begin_ts {
        rollback(st, status);
        return Err(TxError::UpdateAfterDelete {
            table: table.to_owned(),
            row_id,
        });
    }

    let tbl = tables
        .get(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    for (name, value) in values {
        let Some(domain) = tbl.schema().domain_of(name) else {
            rollback(st, status);
            return Err(TxError::UnknownColumn {
                table: table.to_owned(),
                column: name.clone(),
            });
        };
        if value.domain() != domain {
            rollback(st, status);
            return Err(TxError::Schema(chalkdb_rel::SchemaError::DomainMismatch {
                attribute: name.clone(),
                expected: domain,
                found: value.domain(),
            }));
        }
        version.insert(name.clone(), value.clone());
    }

    st.local_updates.insert(key.clone(), version.clone());
    st.write_set.insert(key);
    Ok(version)
}

pub(crate) fn insert(
    st: &mut MvccTx,
    status: &mut TxStatus,
    tables: &mut Tables,
    table: &str,
    values: &RowMap,
) -> Result<RowId, TxError> {
    let tbl = tables
        .get_mut(table)
        .ok_or_else(|| TxError::UnknownTable(table.to_owned()))?;
    let row_id = tbl.next_row_id();

    let mut staged = values.clone();
    staged.insert(ROW_ID.to_owned(), Value::Int(row_id.0 as i64));
    staged.insert(BEGIN_TS.to_owned(), Value::Int(st.begin_ts));
    staged.insert(END_TS.to_owned(), Value::Int(TS_INFINITY));

    // validate the staged row's shape now, not at commit
    if let Err(err) = tbl.map_to_full_row(&normalized(tbl, &staged)) {
        rollback(st, status);
        return Err(err);
    }

    let key = lock_key(table, row_id);
    st.local_updates.insert(key.clone(), normalized(tbl, &staged));
    st.write_set.insert(key);
    Ok(row_id)
}

/// Reorders a staged map into schema attribute order.
fn normalized(table: &Table, staged: &RowMap) -> RowMap {
    table
        .schema()
        .names()
        .filter_map(|name| staged.get(name).map(|v| (name.to_owned(), v.clone())))
        .chain(
            staged
                .iter()
                .filter(|(name, _)| !table.schema().has_attribute(name))
                .map(|(name, v)| (name.clone(), v.clone())),
        )
        .collect()
}

pub(crate) fn delete(
    st: &mut MvccTx,
    status: &mut TxStatus,
    tables: &Tables,
    table: &str,
    row_id: RowId,
) -> Result<(), TxError> {
    let key = lock_key(table, row_id);
    let mut version = match st.local_updates.get(&key) {
        Some(local) => local.clone(),
        None => read(st, status, tables, table, row_id)?,
    };

    // a zero end_ts marks the staged row as a deletion; commit turns it
    // into the prior version's real end timestamp
    version.insert(END_TS.to_owned(), Value::Int(0));
    st.local_updates.insert(key.clone(), version);
    st.write_set.insert(key);
    Ok(())
}

/// Validates against every transaction that committed between our
/// `begin_ts` and `commit_ts`, then installs the staged rows.
pub(crate) fn commit(
    st: &mut MvccTx,
    status: &mut TxStatus,
    isolation: IsolationLevel,
    tables: &mut Tables,
    committed: &[CommittedTx],
    commit_ts: i64,
) -> Result<(), TxError> {
    if *status != TxStatus::Running {
        return Err(TxError::NotRunning);
    }
    st.commit_ts = commit_ts;

    for other in committed {
        if st.begin_ts < other.commit_ts && commit_ts > other.commit_ts {
            if let Some(key) = st.write_set.intersection(&other.write_set).next() {
                let err = TxError::ValidationFailed {
                    table: key.0.clone(),
                    row_id: key.1,
                    anomaly: "write-write",
                };
                rollback(st, status);
                return Err(err);
            }
            if isolation != IsolationLevel::SnapshotIsolation {
                if let Some(key) = st.read_set.intersection(&other.write_set).next() {
                    let err = TxError::ValidationFailed {
                        table: key.0.clone(),
                        row_id: key.1,
                        anomaly: "read-write",
                    };
                    rollback(st, status);
                    return Err(err);
                }
            }
        }
    }

    // install: close the prior visible version, then append the new one
    let staged: Vec<(crate::lock::LockKey, RowMap)> = st.local_updates.drain(..).collect();
    for (key, mut map) in staged {
        let tbl = tables
            .get_mut(&key.0)
            .ok_or_else(|| TxError::UnknownTable(key.0.clone()))?;
        close_visible_version(tbl, key.1, st.begin_ts, commit_ts);
        if ts_field(&map, END_TS) == 0 {
            continue;
        }
        map.insert(BEGIN_TS.to_owned(), Value::Int(commit_ts));
        map.insert(END_TS.to_owned(), Value::Int(TS_INFINITY));
        let row = tbl.map_to_full_row(&map)?;
        tbl.put(row)?;
    }

    st.read_set.clear();
    *status = TxStatus::Committed;
    Ok(())
}

/// Sets `end_ts := commit_ts` on the version visible at `begin_ts`, if
/// any. Rows first inserted by the committing transaction have none.
fn close_visible_version(table: &mut Table, row_id: RowId, begin_ts: i64, commit_ts: i64) {
    let Some(end_index) = table.schema().index_of(END_TS) else {
        return;
    };
    let visible = table
        .get(row_id)
        .iter()
        .position(|version| visible_at(table, version, begin_ts));
    if let Some(pos) = visible {
        if let Some(version) = table.version_mut(row_id, pos) {
            version[end_index] = Value::Int(commit_ts);
        }
    }
}

/// Discards all staged state; nothing was published, so nothing needs
/// undoing.
pub(crate) fn rollback(st: &mut MvccTx, status: &mut TxStatus) {
    if *status != TxStatus::Running {
        return;
    }
    st.read_set.clear();
    st.write_set.clear();
    st.local_updates.clear();
    *status = TxStatus::Aborted;
}
