//! Row-id addressed, optionally multi-versioned tables.
//!
//! Rows are stored as a dense list of version chains: position `i` holds
//! every stored version of row `i`, most recent last. Deleting empties the
//! chain, leaving a hole; in single-version mode the id goes onto a free
//! list and the next insert reuses it.

use crate::error::TxError;
use chalkdb_rel::{Schema, Tuple, Value};
use indexmap::IndexMap;
use std::fmt;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Reserved attribute prepended to every table schema.
pub const ROW_ID: &str = "row_id";
/// Reserved MVCC attribute: first timestamp a version is visible at.
pub const BEGIN_TS: &str = "begin_ts";
/// Reserved MVCC attribute: first timestamp a version is no longer
/// visible at.
pub const END_TS: &str = "end_ts";

/// The abstract +∞ used for the `end_ts` of a current version.
pub const TS_INFINITY: i64 = i64::MAX;

/// Dense integer id of a row, stable across the row's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u64);

impl RowId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One stored version of a row; shaped by the table schema.
pub type Row = Tuple;

/// A row keyed by attribute name, in schema order. The unit the
/// transaction API reads and writes.
pub type RowMap = IndexMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Schema,
    chains: Vec<Vec<Row>>,
    free_ids: Vec<RowId>,
    multiversion: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema, multiversion: bool) -> Self {
        Table {
            name: name.into(),
            schema,
            chains: Vec::new(),
            free_ids: Vec::new(),
            multiversion,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn is_multiversion(&self) -> bool {
        self.multiversion
    }

    /// The version chain of `row_id`, oldest first; empty when the id is
    /// unused or deleted.
    pub fn get(&self, row_id: RowId) -> &[Row] {
        self.chains
            .get(row_id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The most recent version of `row_id`.
    pub fn current_version(&self, row_id: RowId) -> Option<&Row> {
        self.get(row_id).last()
    }

    /// Stores `row` at the chain its `row_id` attribute addresses:
    /// single-version tables overwrite, multi-version tables append.
    pub fn put(&mut self, row: Row) -> Result<(), TxError> {
        self.schema.check_tuple(&row)?;
        let row_id = self.row_id_of(&row)?;
        if row_id.index() >= self.chains.len() {
            return Err(TxError::RowNotFound {
                table: self.name.clone(),
                row_id,
            });
        }
        if self.multiversion {
            self.chains[row_id.index()].push(row);
        } else {
            self.chains[row_id.index()] = vec![row];
        }
        // a write revives the id; it must not be handed out again
        self.free_ids.retain(|free| *free != row_id);
        Ok(())
    }

    /// Mutable access to one version of a chain, for commit-time
    /// timestamp patching.
    pub(crate) fn version_mut(&mut self, row_id: RowId, index: usize) -> Option<&mut Row> {
        self.chains.get_mut(row_id.index())?.get_mut(index)
    }

    /// Pops a free row id, or appends a fresh empty chain.
    pub fn next_row_id(&mut self) -> RowId {
        if let Some(row_id) = self.free_ids.pop() {
            row_id
        } else {
            let row_id = RowId(self.chains.len() as u64);
            self.chains.push(Vec::new());
            row_id
        }
    }

    /// Empties the version chain of `row_id`; in single-version mode the
    /// id becomes reusable by the next insert.
    pub fn delete(&mut self, row_id: RowId) {
        if row_id.index() >= self.chains.len() {
            return;
        }
        self.chains[row_id.index()].clear();
        if !self.multiversion && !self.free_ids.contains(&row_id) {
            self.free_ids.push(row_id);
        }
    }

    /// How many row ids have a live (non-empty) chain.
    pub fn live_rows(&self) -> usize {
        self.chains.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn row_to_map(&self, row: &Row) -> RowMap {
        self.schema
            .names()
            .map(str::to_owned)
            .zip(row.iter().cloned())
            .collect()
    }

    /// Applies `values` on top of `base`, returning the new row. Unknown
    /// attribute names and domain mismatches are rejected.
    pub fn map_to_row(&self, values: &RowMap, base: Row) -> Result<Row, TxError> {
        let mut row = base;
        for (name, value) in values {
            let index = self
                .schema
                .index_of(name)
                .ok_or_else(|| TxError::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                })?;
            row[index] = value.clone();
        }
        self.schema.check_tuple(&row)?;
        Ok(row)
    }

    /// Builds a full row from `values` alone; every schema attribute must
    /// be present.
    pub fn map_to_full_row(&self, values: &RowMap) -> Result<Row, TxError> {
        for name in values.keys() {
            if !self.schema.has_attribute(name) {
                return Err(TxError::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }
        }
        let row = self
            .schema
            .names()
            .map(|name| {
                values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| chalkdb_rel::SchemaError::MissingValue(name.to_owned()))
            })
            .collect::<Result<Row, _>>()?;
        self.schema.check_tuple(&row)?;
        Ok(row)
    }

    fn row_id_of(&self, row: &Row) -> Result<RowId, TxError> {
        let index = self
            .schema
            .index_of(ROW_ID)
            .ok_or_else(|| TxError::UnknownColumn {
                table: self.name.clone(),
                column: ROW_ID.to_owned(),
            })?;
        match &row[index] {
            Value::Int(i) if *i >= 0 => Ok(RowId(*i as u64)),
            other => Err(TxError::Schema(chalkdb_rel::SchemaError::DomainMismatch {
                attribute: ROW_ID.to_owned(),
                expected: chalkdb_rel::Domain::Int,
                found: other.domain(),
            })),
        }
    }

    fn render(&self, title: &str, rows: &[&Row], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{title}")?;
        let mut builder = Builder::default();
        builder.set_header(self.schema.names());
        for row in rows {
            builder.push_record(row.iter().map(|v| v.to_string()));
        }
        writeln!(f, "{}", builder.build().with(Style::psql()))
    }
}

/// Renders the current versions, then (for multi-version tables with
/// history) a second block listing the superseded versions.
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current = Vec::new();
        let mut older = Vec::new();
        for chain in &self.chains {
            if let Some((last, rest)) = chain.split_last() {
                current.push(last);
                older.extend(rest);
            }
        }
        self.render(&self.name, &current, f)?;
        if !older.is_empty() {
            writeln!(f)?;
            self.render(&format!("{} (older versions)", self.name), &older, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkdb_rel::{row, Domain};
    use pretty_assertions::assert_eq;

    fn single_version() -> Table {
        let schema = Schema::new([(ROW_ID, Domain::Int), ("balance", Domain::Int)]).unwrap();
        Table::new("accounts", schema, false)
    }

    fn multi_version() -> Table {
        let schema = Schema::new([
            (ROW_ID, Domain::Int),
            (BEGIN_TS, Domain::Int),
            (END_TS, Domain::Int),
            ("balance", Domain::Int),
        ])
        .unwrap();
        Table::new("accounts", schema, true)
    }

    #[test]
    fn put_overwrites_in_single_version_mode() {
        let mut t = single_version();
        let id = t.next_row_id();
        t.put(row![id.0 as i64, 100]).unwrap();
        t.put(row![id.0 as i64, 150]).unwrap();
        assert_eq!(t.get(id), vec![row![0, 150]]);
    }

    #[test]
    fn put_appends_in_multi_version_mode() {
        let mut t = multi_version();
        let id = t.next_row_id();
        t.put(row![id.0 as i64, 1, 5, 100]).unwrap();
        t.put(row![id.0 as i64, 5, TS_INFINITY, 150]).unwrap();
        assert_eq!(t.get(id).len(), 2);
        assert_eq!(t.current_version(id), Some(&row![0, 5, TS_INFINITY, 150]));
    }

    #[test]
    fn deleted_ids_are_reused_by_the_next_insert() {
        let mut t = single_version();
        let a = t.next_row_id();
        let b = t.next_row_id();
        t.put(row![a.0 as i64, 1]).unwrap();
        t.put(row![b.0 as i64, 2]).unwrap();
        t.delete(a);
        assert!(t.get(a).is_empty());
        assert_eq!(t.next_row_id(), a);
        assert_eq!(t.next_row_id(), RowId(2));
    }

    #[test]
    fn put_validates_row_shape() {
        let mut t = single_version();
        let id = t.next_row_id();
        assert!(matches!(t.put(row![id.0 as i64]), Err(TxError::Schema(_))));
        assert!(matches!(
            t.put(row![99, 1]),
            Err(TxError::RowNotFound { .. })
        ));
    }

    #[test]
    fn map_round_trip_and_updates() {
        let mut t = single_version();
        let id = t.next_row_id();
        t.put(row![id.0 as i64, 100]).unwrap();
        let map = t.row_to_map(t.current_version(id).unwrap());
        assert_eq!(map.get("balance"), Some(&Value::Int(100)));

        let mut update = RowMap::new();
        update.insert("balance".into(), Value::Int(42));
        let updated = t.map_to_row(&update, t.current_version(id).unwrap().clone()).unwrap();
        assert_eq!(updated, row![0, 42]);

        let mut bogus = RowMap::new();
        bogus.insert("missing".into(), Value::Int(0));
        assert!(matches!(
            t.map_to_row(&bogus, t.current_version(id).unwrap().clone()),
            Err(TxError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn display_splits_current_and_older_versions() {
        let mut t = multi_version();
        let id = t.next_row_id();
        t.put(row![id.0 as i64, 1, 5, 100]).unwrap();
        t.put(row![id.0 as i64, 5, TS_INFINITY, 150]).unwrap();
        let rendered = t.to_string();
        assert!(rendered.contains("accounts (older versions)"));
    }
}
