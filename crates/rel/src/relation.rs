use crate::error::SchemaError;
use crate::index::Index;
use crate::schema::Schema;
use crate::value::{Domain, Tuple};
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use tabled::builder::Builder;
use tabled::settings::Style;

/// A named set of same-shape tuples under a schema.
///
/// Tuples are deduplicated (set semantics) but iteration follows insertion
/// order, which keeps rendering and nested-loop evaluation deterministic.
/// Secondary indexes are registered per attribute and rebuilt from scratch;
/// they are not maintained across later insertions.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    schema: Schema,
    tuples: IndexSet<Tuple>,
    indexes: IndexMap<String, Index>,
}

impl Relation {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Relation {
            name: name.into(),
            schema,
            tuples: IndexSet::new(),
            indexes: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Adds `tuple`, returning whether it was newly inserted.
    pub fn add_tuple(&mut self, tuple: Tuple) -> Result<bool, SchemaError> {
        self.schema.check_tuple(&tuple)?;
        Ok(self.tuples.insert(tuple))
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.tuples.contains(tuple)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.schema.has_attribute(name)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name)
    }

    pub fn attribute_domain(&self, name: &str) -> Option<Domain> {
        self.schema.domain_of(name)
    }

    /// Builds (or rebuilds) a secondary index on `attribute`.
    pub fn build_index(&mut self, attribute: &str) -> Result<(), SchemaError> {
        let index = Index::build(self, attribute)?;
        self.indexes.insert(attribute.to_owned(), index);
        Ok(())
    }

    pub fn has_index_on(&self, attribute: &str) -> bool {
        self.indexes.contains_key(attribute)
    }

    pub fn index_on(&self, attribute: &str) -> Option<&Index> {
        self.indexes.get(attribute)
    }

    pub fn indexed_attributes(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(|k| k.as_str())
    }
}

/// Relations compare by their tuple sets alone; names and attribute names
/// do not participate.
impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.tuples == other.tuples
    }
}

impl Eq for Relation {}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] : {}", self.name, self.schema)?;
        let mut builder = Builder::default();
        builder.set_header(self.schema.names());
        for tuple in &self.tuples {
            builder.push_record(tuple.iter().map(|v| v.to_string()));
        }
        write!(f, "{}", builder.build().with(Style::psql()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn sample() -> Relation {
        let schema = Schema::new([("a", Domain::Int), ("b", Domain::Str)]).unwrap();
        Relation::new("R", schema)
    }

    #[test]
    fn duplicates_collapse() {
        let mut r = sample();
        assert_eq!(r.add_tuple(row![1, "x"]), Ok(true));
        assert_eq!(r.add_tuple(row![1, "x"]), Ok(false));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn schema_violations_are_rejected() {
        let mut r = sample();
        assert!(matches!(
            r.add_tuple(row![1]),
            Err(SchemaError::ArityMismatch { .. })
        ));
        assert!(matches!(
            r.add_tuple(row!["x", "y"]),
            Err(SchemaError::DomainMismatch { .. })
        ));
        assert!(r.is_empty());
    }

    #[test]
    fn equality_ignores_names() {
        let mut r = sample();
        let schema = Schema::new([("c", Domain::Int), ("d", Domain::Str)]).unwrap();
        let mut s = Relation::new("S", schema);
        r.add_tuple(row![1, "x"]).unwrap();
        r.add_tuple(row![2, "y"]).unwrap();
        s.add_tuple(row![2, "y"]).unwrap();
        s.add_tuple(row![1, "x"]).unwrap();
        assert_eq!(r, s);
    }

    #[test]
    fn display_renders_header_and_rows() {
        let mut r = sample();
        r.add_tuple(row![1, "x"]).unwrap();
        let rendered = r.to_string();
        assert!(rendered.contains("[R] : {[ a:int, b:str ]}"));
        assert!(rendered.contains(" a | b"));
        assert!(rendered.contains(" 1 | x"));
    }

    #[test]
    fn index_registry() {
        let mut r = sample();
        r.add_tuple(row![1, "x"]).unwrap();
        r.build_index("a").unwrap();
        assert!(r.has_index_on("a"));
        assert!(!r.has_index_on("b"));
        assert_eq!(
            r.index_on("a").unwrap().lookup(crate::CmpOp::Eq, &Value::Int(1)).len(),
            1
        );
        assert_eq!(
            r.build_index("missing"),
            Err(SchemaError::UnknownAttribute("missing".into()))
        );
    }
}
