//! Precedence graphs over schedules: an edge T1 → T2 whenever an earlier
//! statement of T1 and a later statement of T2 touch the same row and at
//! least one of the two accesses writes. Rendered as Graphviz source.

use crate::schedule::ScheduledStatement;
use crate::table::RowId;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Computes the conflict edges of `schedule` as `(from, to)` transaction
/// name pairs.
pub fn conflict_edges(schedule: &[ScheduledStatement]) -> BTreeSet<(String, String)> {
    let mut accesses: IndexMap<RowId, Vec<(&str, bool)>> = IndexMap::new();
    for entry in schedule {
        if let Some((row_id, writes)) = entry.statement.row_access() {
            accesses
                .entry(row_id)
                .or_default()
                .push((entry.tx.as_str(), writes));
        }
    }

    let mut edges = BTreeSet::new();
    for list in accesses.values() {
        for i in 0..list.len() {
            for j in i + 1..list.len() {
                let (tx_i, write_i) = list[i];
                let (tx_j, write_j) = list[j];
                if tx_i != tx_j && (write_i || write_j) {
                    edges.insert((tx_i.to_owned(), tx_j.to_owned()));
                }
            }
        }
    }
    edges
}

/// Emits the precedence graph of `schedule` as Graphviz source.
pub fn precedence_graph(schedule: &[ScheduledStatement]) -> String {
    let mut nodes: Vec<&str> = Vec::new();
    for entry in schedule {
        if !nodes.contains(&entry.tx.as_str()) {
            nodes.push(&entry.tx);
        }
    }

    let mut out = String::new();
    out.push_str("digraph {\n");
    for node in nodes {
        let _ = writeln!(out, "  \"{node}\";");
    }
    for (from, to) in conflict_edges(schedule) {
        let _ = writeln!(out, "  \"{from}\" -> \"{to}\";");
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::parse_schedule;

    #[test]
    fn writes_conflict_reads_do_not() {
        let schedule = parse_schedule(
            "\
            T1;BEGIN()\n\
            T2;BEGIN()\n\
            T1;a = READ(table_name=t, rowid=0, column=x)\n\
            T2;UPDATE(table_name=t, rowid=0, values={'x': 1})\n\
            T2;b = READ(table_name=t, rowid=1, column=x)\n\
            T1;c = READ(table_name=t, rowid=1, column=x)\n\
            T1;COMMIT()\n\
            T2;COMMIT()\n",
        )
        .unwrap();

        let edges = conflict_edges(&schedule);
        // read/write on row 0 conflicts, read/read on row 1 does not
        assert!(edges.contains(&("T1".into(), "T2".into())));
        assert_eq!(edges.len(), 1);

        let dot = precedence_graph(&schedule);
        assert!(dot.contains("\"T1\" -> \"T2\";"));
        assert!(dot.contains("\"T2\";"));
    }

    #[test]
    fn same_transaction_never_conflicts_with_itself() {
        let schedule = parse_schedule(
            "\
            T1;BEGIN()\n\
            T1;a = READ(table_name=t, rowid=0, column=x)\n\
            T1;UPDATE(table_name=t, rowid=0, values={'x': 1})\n\
            T1;COMMIT()\n",
        )
        .unwrap();
        assert!(conflict_edges(&schedule).is_empty());
    }
}
