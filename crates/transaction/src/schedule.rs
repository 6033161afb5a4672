//! The schedule front-end: parsing `<tx>;<statement>` lines into typed
//! statements and executing them against a [`TransactionManager`].
//!
//! The executor walks the schedule in order, keeping one FIFO of pending
//! statements per transaction. A statement whose transaction already has
//! pending work is queued behind it; a statement that fails transiently
//! (a lock it could not get) is queued for retry. Between steps the
//! executor retries the head of every pending queue, draining a queue as
//! long as its statements keep succeeding. Statements therefore reorder
//! across transactions but never within one.

use crate::error::{DBError, ScheduleError, TxError};
use crate::manager::TransactionManager;
use crate::table::{RowId, RowMap};
use crate::tx::{Transaction, TxStatus};
use chalkdb_engine::Predicate;
use chalkdb_rel::Value;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Begin,
    Read {
        var: String,
        table: String,
        row_id: RowId,
        column: String,
    },
    Update {
        table: String,
        row_id: RowId,
        values: RowMap,
    },
    Insert {
        table: String,
        values: RowMap,
    },
    Delete {
        table: String,
        row_id: RowId,
    },
    Assert {
        constraint: String,
    },
    Commit,
    Abort,
}

impl Statement {
    /// The row this statement touches and whether it writes, for
    /// precedence-graph construction. Inserts allocate a fresh id and do
    /// not participate.
    pub(crate) fn row_access(&self) -> Option<(RowId, bool)> {
        match self {
            Statement::Read { row_id, .. } => Some((*row_id, false)),
            Statement::Update { row_id, .. } | Statement::Delete { row_id, .. } => {
                Some((*row_id, true))
            }
            _ => None,
        }
    }
}

fn fmt_values(values: &RowMap, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, value)) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match value {
            Value::Str(s) => write!(f, "'{name}': '{s}'")?,
            other => write!(f, "'{name}': {other}")?,
        }
    }
    write!(f, "}}")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Begin => write!(f, "BEGIN()"),
            Statement::Read {
                var,
                table,
                row_id,
                column,
            } => write!(
                f,
                "{var} = READ(table_name={table}, rowid={row_id}, column={column})"
            ),
            Statement::Update {
                table,
                row_id,
                values,
            } => {
                write!(f, "UPDATE(table_name={table}, rowid={row_id}, values=")?;
                fmt_values(values, f)?;
                write!(f, ")")
            }
            Statement::Insert { table, values } => {
                write!(f, "INSERT(table_name={table}, values=")?;
                fmt_values(values, f)?;
                write!(f, ")")
            }
            Statement::Delete { table, row_id } => {
                write!(f, "DELETE(table_name={table}, rowid={row_id})")
            }
            Statement::Assert { constraint } => write!(f, "ASSERT(constraint={constraint})"),
            Statement::Commit => write!(f, "COMMIT()"),
            Statement::Abort => write!(f, "ABORT()"),
        }
    }
}

/// One schedule entry: the owning transaction's name plus the statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStatement {
    pub tx: String,
    pub statement: Statement,
}

static BEGIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*BEGIN\s*\(\s*\)\s*$").expect("static regex"));
static COMMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*COMMIT\s*\(\s*\)\s*$").expect("static regex"));
static ABORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*ABORT\s*\(\s*\)\s*$").expect("static regex"));
static READ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([A-Za-z_]\w*)\s*=\s*READ\s*\(\s*table_name\s*=\s*([A-Za-z_]\w*)\s*,\s*rowid\s*=\s*(\d+)\s*,\s*column\s*=\s*([A-Za-z_]\w*)\s*\)\s*$",
    )
    .expect("static regex")
});
static UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*UPDATE\s*\(\s*table_name\s*=\s*([A-Za-z_]\w*)\s*,\s*rowid\s*=\s*(\d+)\s*,\s*values\s*=\s*\{(.*)\}\s*\)\s*$",
    )
    .expect("static regex")
});
static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*INSERT\s*\(\s*table_name\s*=\s*([A-Za-z_]\w*)\s*,\s*values\s*=\s*\{(.*)\}\s*\)\s*$",
    )
    .expect("static regex")
});
static DELETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*DELETE\s*\(\s*table_name\s*=\s*([A-Za-z_]\w*)\s*,\s*rowid\s*=\s*(\d+)\s*\)\s*$",
    )
    .expect("static regex")
});
static ASSERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*ASSERT\s*\(\s*constraint\s*=\s*(.*)\)\s*$").expect("static regex"));

/// Parses a whole schedule, one `<tx>;<statement>` per non-empty line.
pub fn parse_schedule(input: &str) -> Result<Vec<ScheduledStatement>, ScheduleError> {
    let mut statements = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let index = statements.len();
        let (tx, text) = line.split_once(';').ok_or_else(|| ScheduleError::Parse {
            index,
            text: line.to_owned(),
        })?;
        let tx = tx.trim();
        if tx.is_empty() {
            return Err(ScheduleError::Parse {
                index,
                text: line.to_owned(),
            });
        }
        statements.push(ScheduledStatement {
            tx: tx.to_owned(),
            statement: parse_statement(text, index)?,
        });
    }
    Ok(statements)
}

fn parse_statement(text: &str, index: usize) -> Result<Statement, ScheduleError> {
    let parse_err = || ScheduleError::Parse {
        index,
        text: text.trim().to_owned(),
    };
    if BEGIN_RE.is_match(text) {
        return Ok(Statement::Begin);
    }
    if COMMIT_RE.is_match(text) {
        return Ok(Statement::Commit);
    }
    if ABORT_RE.is_match(text) {
        return Ok(Statement::Abort);
    }
    if let Some(caps) = READ_RE.captures(text) {
        return Ok(Statement::Read {
            var: caps[1].to_owned(),
            table: caps[2].to_owned(),
            row_id: RowId(caps[3].parse().map_err(|_| parse_err())?),
            column: caps[4].to_owned(),
        });
    }
    if let Some(caps) = UPDATE_RE.captures(text) {
        return Ok(Statement::Update {
            table: caps[1].to_owned(),
            row_id: RowId(caps[2].parse().map_err(|_| parse_err())?),
            values: parse_values(&caps[3]).ok_or_else(parse_err)?,
        });
    }
    if let Some(caps) = INSERT_RE.captures(text) {
        return Ok(Statement::Insert {
            table: caps[1].to_owned(),
            values: parse_values(&caps[2]).ok_or_else(parse_err)?,
        });
    }
    if let Some(caps) = DELETE_RE.captures(text) {
        return Ok(Statement::Delete {
            table: caps[1].to_owned(),
            row_id: RowId(caps[2].parse().map_err(|_| parse_err())?),
        });
    }
    if let Some(caps) = ASSERT_RE.captures(text) {
        return Ok(Statement::Assert {
            constraint: caps[1].trim().to_owned(),
        });
    }
    Err(parse_err())
}

/// Parses the interior of a `values` dictionary: `'name': value` entries
/// separated by commas. Strings are quoted, numbers are not.
fn parse_values(text: &str) -> Option<RowMap> {
    let mut values = RowMap::new();
    let text = text.trim();
    if text.is_empty() {
        return Some(values);
    }
    for entry in text.split(',') {
        let (key, value) = entry.split_once(':')?;
        let key = key.trim();
        let key = key
            .strip_prefix('\'')
            .and_then(|k| k.strip_suffix('\''))
            .or_else(|| key.strip_prefix('"').and_then(|k| k.strip_suffix('"')))?;
        values.insert(key.to_owned(), parse_scalar(value.trim())?);
    }
    Some(values)
}

fn parse_scalar(text: &str) -> Option<Value> {
    if let Some(stripped) = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
    {
        return Some(Value::from(stripped));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Some(Value::from(f));
    }
    None
}

/// What happened to a schedule once it ran to completion.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Indices into the input schedule in actual execution order, with
    /// the statements of aborted transactions removed.
    pub executed: Vec<usize>,
    /// Final status of every transaction named in the schedule.
    pub statuses: IndexMap<String, TxStatus>,
    /// Final contents of the shared variable environment.
    pub variables: IndexMap<String, Value>,
}

/// Runs `schedule` to completion against `manager`.
pub fn execute_schedule(
    manager: &mut TransactionManager,
    schedule: &[ScheduledStatement],
) -> Result<ScheduleOutcome, DBError> {
    let mut txs: IndexMap<String, Transaction> = IndexMap::new();
    let mut variables: IndexMap<String, Value> = IndexMap::new();
    let mut pending: IndexMap<String, VecDeque<usize>> = schedule
        .iter()
        .map(|s| (s.tx.clone(), VecDeque::new()))
        .collect();
    let mut executed: Vec<usize> = Vec::new();
    let n = schedule.len();
    let mut ip = 0usize;

    loop {
        let heads: Vec<usize> = {
            let mut heads: Vec<usize> = pending.values().filter_map(|q| q.front().copied()).collect();
            heads.sort_unstable();
            heads
        };

        if heads.is_empty() {
            if ip < n {
                let ok = exec_statement(manager, &mut txs, &mut variables, schedule, ip)?;
                if ok {
                    record(&txs, schedule, &mut executed, ip);
                } else {
                    pending[&schedule[ip].tx].push_back(ip);
                }
                ip += 1;
            }
        } else {
            if ip < n {
                let tx_name = schedule[ip].tx.clone();
                if !pending[&tx_name].is_empty() {
                    pending[&tx_name].push_back(ip);
                } else {
                    let ok = exec_statement(manager, &mut txs, &mut variables, schedule, ip)?;
                    if ok {
                        record(&txs, schedule, &mut executed, ip);
                    } else {
                        pending[&tx_name].push_back(ip);
                    }
                }
                ip += 1;
            }

            let mut progress = false;
            for seq in heads {
                let tx_name = schedule[seq].tx.clone();
                if pending[&tx_name].front() != Some(&seq) {
                    continue;
                }
                if exec_statement(manager, &mut txs, &mut variables, schedule, seq)? {
                    pending[&tx_name].pop_front();
                    record(&txs, schedule, &mut executed, seq);
                    progress = true;
                    // keep draining this transaction until it fails again
                    while let Some(&next) = pending[&tx_name].front() {
                        if !exec_statement(manager, &mut txs, &mut variables, schedule, next)? {
                            break;
                        }
                        pending[&tx_name].pop_front();
                        record(&txs, schedule, &mut executed, next);
                    }
                }
            }

            // with the input exhausted and no queue moving, the schedule
            // has wedged. A running transaction whose statements are all
            // consumed can never commit or release anything, so abort it
            // first; failing that, abort the oldest pending statement's
            // owner so the rest can drain.
            if !progress && ip >= n {
                let stuck = txs
                    .iter()
                    .find(|(name, tx)| tx.is_running() && pending[name.as_str()].is_empty())
                    .map(|(name, _)| name.clone())
                    .or_else(|| {
                        pending
                            .values()
                            .filter_map(|q| q.front())
                            .min()
                            .map(|&oldest| schedule[oldest].tx.clone())
                    });
                if let Some(tx_name) = stuck {
                    log::warn!("schedule wedged; aborting `{tx_name}` to make progress");
                    if let Some(tx) = txs.get_mut(&tx_name) {
                        manager.abort_transaction(tx);
                    }
                }
            }
        }

        if ip >= n && pending.values().all(VecDeque::is_empty) {
            break;
        }
    }

    executed.retain(|&i| {
        txs.get(&schedule[i].tx)
            .map(|tx| tx.status() != TxStatus::Aborted)
            .unwrap_or(false)
    });

    let statuses = txs.iter().map(|(name, tx)| (name.clone(), tx.status())).collect();
    Ok(ScheduleOutcome {
        executed,
        statuses,
        variables,
    })
}

fn record(
    txs: &IndexMap<String, Transaction>,
    schedule: &[ScheduledStatement],
    executed: &mut Vec<usize>,
    index: usize,
) {
    let aborted = txs
        .get(&schedule[index].tx)
        .map(|tx| tx.status() == TxStatus::Aborted)
        .unwrap_or(false);
    if !aborted {
        executed.push(index);
    }
}

/// Executes one statement. `Ok(true)` is success, `Ok(false)` means the
/// statement failed and should be queued for retry; hard errors (unknown
/// table, malformed schedule) bubble out.
fn exec_statement(
    manager: &mut TransactionManager,
    txs: &mut IndexMap<String, Transaction>,
    variables: &mut IndexMap<String, Value>,
    schedule: &[ScheduledStatement],
    index: usize,
) -> Result<bool, DBError> {
    let ScheduledStatement { tx: tx_name, statement } = &schedule[index];

    if let Statement::Begin = statement {
        if txs.contains_key(tx_name) {
            return Err(ScheduleError::DuplicateBegin {
                index,
                tx: tx_name.clone(),
            }
            .into());
        }
        txs.insert(tx_name.clone(), manager.begin_transaction());
        return Ok(true);
    }

    let tx = txs.get_mut(tx_name).ok_or_else(|| ScheduleError::MissingBegin {
        index,
        tx: tx_name.clone(),
    })?;
    // operations against a finished transaction are no-ops that succeed,
    // which is how the queued tail of an aborted transaction drains
    if !tx.is_running() {
        return Ok(true);
    }

    match statement {
        Statement::Read {
            var,
            table,
            row_id,
            column,
        } => match manager.read(tx, table, *row_id) {
            Ok(row) => match row.get(column) {
                Some(value) => {
                    variables.insert(var.clone(), value.clone());
                    Ok(true)
                }
                None => {
                    log::warn!("column `{column}` missing from `{table}`; aborting `{tx_name}`");
                    manager.abort_transaction(tx);
                    Ok(false)
                }
            },
            Err(err) => step_failure(err),
        },
        Statement::Update {
            table,
            row_id,
            values,
        } => match manager.update(tx, table, *row_id, values) {
            Ok(_) => Ok(true),
            Err(err) => step_failure(err),
        },
        Statement::Insert { table, values } => match manager.insert(tx, table, values) {
            Ok(_) => Ok(true),
            Err(err) => step_failure(err),
        },
        Statement::Delete { table, row_id } => match manager.delete(tx, table, *row_id) {
            Ok(()) => Ok(true),
            Err(err) => step_failure(err),
        },
        Statement::Assert { constraint } => {
            let holds = Predicate::parse(constraint)
                .and_then(|p| p.eval(&|name| variables.get(name).cloned()));
            match holds {
                Ok(true) => Ok(true),
                Ok(false) => {
                    log::debug!("assertion `{constraint}` failed; aborting `{tx_name}`");
                    manager.abort_transaction(tx);
                    Ok(true)
                }
                Err(err) => {
                    log::warn!("assertion `{constraint}` unevaluable ({err}); aborting `{tx_name}`");
                    manager.abort_transaction(tx);
                    Ok(true)
                }
            }
        }
        Statement::Commit => Ok(manager.commit_transaction(tx)?),
        Statement::Abort => {
            manager.abort_transaction(tx);
            Ok(true)
        }
        Statement::Begin => unreachable!("handled above"),
    }
}

/// Failed statements suspend for retry unless the schedule itself is
/// broken (an unknown table never heals).
fn step_failure(err: DBError) -> Result<bool, DBError> {
    match err {
        DBError::Tx(TxError::UnknownTable(table)) => Err(TxError::UnknownTable(table).into()),
        DBError::Tx(_) => Ok(false),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_every_statement_form() {
        let input = "\
            T1;BEGIN()\n\
            T1;v = READ(table_name=accounts, rowid=0, column=balance)\n\
            T1;UPDATE(table_name=accounts, rowid=0, values={'balance': 110})\n\
            T1;INSERT(table_name=accounts, values={'balance': 50, 'owner': 'ada'})\n\
            T1;DELETE(table_name=accounts, rowid=1)\n\
            T1;ASSERT(constraint=v > 100)\n\
            T1;COMMIT()\n\
            T2;ABORT()\n";
        let schedule = parse_schedule(input).unwrap();
        assert_eq!(schedule.len(), 8);
        assert_eq!(schedule[0].statement, Statement::Begin);
        assert_eq!(
            schedule[1].statement,
            Statement::Read {
                var: "v".into(),
                table: "accounts".into(),
                row_id: RowId(0),
                column: "balance".into(),
            }
        );
        match &schedule[3].statement {
            Statement::Insert { values, .. } => {
                assert_eq!(values.get("balance"), Some(&Value::Int(50)));
                assert_eq!(values.get("owner"), Some(&Value::from("ada")));
            }
            other => panic!("expected insert, got {other}"),
        }
        assert_eq!(schedule[7].tx, "T2");
    }

    #[test]
    fn statements_round_trip_through_display() {
        let input = "T1;UPDATE(table_name=accounts, rowid=3, values={'balance': 12})";
        let schedule = parse_schedule(input).unwrap();
        assert_eq!(
            schedule[0].statement.to_string(),
            "UPDATE(table_name=accounts, rowid=3, values={'balance': 12})"
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            parse_schedule("T1 BEGIN()"),
            Err(ScheduleError::Parse { .. })
        ));
        assert!(matches!(
            parse_schedule("T1;READ(rowid=0)"),
            Err(ScheduleError::Parse { .. })
        ));
        assert!(matches!(
            parse_schedule("T1;UPDATE(table_name=t, rowid=x, values={'a': 1})"),
            Err(ScheduleError::Parse { .. })
        ));
    }

    #[test]
    fn values_support_floats_and_quoted_strings() {
        let schedule =
            parse_schedule("T1;UPDATE(table_name=t, rowid=0, values={'x': 1.5, 'y': \"hi\"})")
                .unwrap();
        match &schedule[0].statement {
            Statement::Update { values, .. } => {
                assert_eq!(values.get("x"), Some(&Value::from(1.5)));
                assert_eq!(values.get("y"), Some(&Value::from("hi")));
            }
            other => panic!("expected update, got {other}"),
        }
    }
}
