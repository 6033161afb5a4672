//! Relations over typed tuples, plus the sorted secondary index used by
//! index-based plan operators. Everything lives in memory; nothing here
//! knows about transactions or query plans.

pub mod error;
pub mod index;
pub mod relation;
pub mod schema;
pub mod value;

pub use error::SchemaError;
pub use index::Index;
pub use relation::Relation;
pub use schema::{is_identifier, Attribute, Schema};
pub use value::{CmpOp, Domain, Tuple, Value, F64};

/// Builds a [`Tuple`] from a list of values convertible into [`Value`].
///
/// ```
/// use chalkdb_rel::row;
/// let t = row![1, 2.5, "movie"];
/// assert_eq!(t.len(), 3);
/// ```
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::Value::from($v)),*]
    };
}
