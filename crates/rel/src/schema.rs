use crate::error::SchemaError;
use crate::value::{Domain, Tuple};
use itertools::Itertools;
use std::fmt;

/// Tests whether `s` is usable as an attribute or relation name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A named, typed column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub domain: Domain,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.domain)
    }
}

/// An ordered list of attribute declarations with unique identifier names.
/// Equality is structural, name- and domain-wise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    attrs: Vec<Attribute>,
}

impl Schema {
    pub fn new<N: Into<String>>(
        attrs: impl IntoIterator<Item = (N, Domain)>,
    ) -> Result<Self, SchemaError> {
        let attrs = attrs
            .into_iter()
            .map(|(name, domain)| Attribute {
                name: name.into(),
                domain,
            })
            .collect::<Vec<_>>();
        Self::from_attributes(attrs)
    }

    pub fn from_attributes(attrs: Vec<Attribute>) -> Result<Self, SchemaError> {
        for (i, attr) in attrs.iter().enumerate() {
            if !is_identifier(&attr.name) {
                return Err(SchemaError::InvalidIdentifier(attr.name.clone()));
            }
            if attrs[..i].iter().any(|a| a.name == attr.name) {
                return Err(SchemaError::DuplicateAttribute(attr.name.clone()));
            }
        }
        Ok(Schema { attrs })
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.iter().map(|a| a.name.as_str())
    }

    pub fn attribute(&self, index: usize) -> &Attribute {
        &self.attrs[index]
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name == name)
    }

    pub fn domain_of(&self, name: &str) -> Option<Domain> {
        self.attrs.iter().find(|a| a.name == name).map(|a| a.domain)
    }

    /// Validates a tuple against the schema: right arity, right domains.
    pub fn check_tuple(&self, tuple: &Tuple) -> Result<(), SchemaError> {
        if tuple.len() != self.attrs.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.attrs.len(),
                found: tuple.len(),
            });
        }
        for (value, attr) in tuple.iter().zip(&self.attrs) {
            if value.domain() != attr.domain {
                return Err(SchemaError::DomainMismatch {
                    attribute: attr.name.clone(),
                    expected: attr.domain,
                    found: value.domain(),
                });
            }
        }
        Ok(())
    }

    /// Concatenates two schemas; overlapping attribute names are rejected.
    pub fn concat(&self, other: &Schema) -> Result<Schema, SchemaError> {
        let mut attrs = self.attrs.clone();
        for attr in &other.attrs {
            if self.has_attribute(&attr.name) {
                return Err(SchemaError::DuplicateAttribute(attr.name.clone()));
            }
            attrs.push(attr.clone());
        }
        Ok(Schema { attrs })
    }

    /// Restricts the schema to `names`, in the order given.
    pub fn project(&self, names: &[String]) -> Result<Schema, SchemaError> {
        let attrs = names
            .iter()
            .map(|name| {
                self.index_of(name)
                    .map(|i| self.attrs[i].clone())
                    .ok_or_else(|| SchemaError::UnknownAttribute(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Schema { attrs })
    }

    /// Renames the first occurrence of `old_name` to `new_name`.
    pub fn rename(&self, new_name: &str, old_name: &str) -> Result<Schema, SchemaError> {
        if !is_identifier(new_name) {
            return Err(SchemaError::InvalidIdentifier(new_name.to_owned()));
        }
        if !is_identifier(old_name) {
            return Err(SchemaError::InvalidIdentifier(old_name.to_owned()));
        }
        let mut attrs = self.attrs.clone();
        let pos = attrs
            .iter()
            .position(|a| a.name == old_name)
            .ok_or_else(|| SchemaError::UnknownAttribute(old_name.to_owned()))?;
        attrs[pos].name = new_name.to_owned();
        Self::from_attributes(attrs)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{[ {} ]}}", self.attrs.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sample() -> Schema {
        Schema::new([("a", Domain::Int), ("b", Domain::Str)]).unwrap()
    }

    #[test]
    fn rejects_duplicates_and_bad_identifiers() {
        assert_eq!(
            Schema::new([("a", Domain::Int), ("a", Domain::Str)]),
            Err(SchemaError::DuplicateAttribute("a".into()))
        );
        assert_eq!(
            Schema::new([("3a", Domain::Int)]),
            Err(SchemaError::InvalidIdentifier("3a".into()))
        );
    }

    #[test]
    fn check_tuple_validates_arity_and_domains() {
        let schema = sample();
        assert_eq!(schema.check_tuple(&row![1, "x"]), Ok(()));
        assert!(matches!(
            schema.check_tuple(&row![1]),
            Err(SchemaError::ArityMismatch { .. })
        ));
        assert!(matches!(
            schema.check_tuple(&row![1, 2]),
            Err(SchemaError::DomainMismatch { .. })
        ));
    }

    #[test]
    fn rename_hits_first_occurrence_only() {
        let renamed = sample().rename("c", "a").unwrap();
        assert_eq!(renamed.names().collect::<Vec<_>>(), ["c", "b"]);
        assert_eq!(
            sample().rename("c", "missing"),
            Err(SchemaError::UnknownAttribute("missing".into()))
        );
    }

    #[test]
    fn concat_rejects_overlap() {
        let other = Schema::new([("a", Domain::Int)]).unwrap();
        assert_eq!(
            sample().concat(&other),
            Err(SchemaError::DuplicateAttribute("a".into()))
        );
    }
}
