use crate::value::Domain;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("tuple has {found} components but the schema declares {expected}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("attribute `{attribute}` expects {expected}, got {found}")]
    DomainMismatch {
        attribute: String,
        expected: Domain,
        found: Domain,
    },
    #[error("attribute `{0}` not found")]
    UnknownAttribute(String),
    #[error("duplicate attribute `{0}`")]
    DuplicateAttribute(String),
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("attribute name `{0}` is reserved")]
    ReservedAttribute(String),
    #[error("insert values are missing attribute `{0}`")]
    MissingValue(String),
}
