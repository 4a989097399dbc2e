//! Schema compatibility validation: whether a transaction's view of a
//! table's schema remains valid across its lifetime, from first read to
//! commit.

pub mod catalog_history;
pub mod change;
pub mod error;
pub mod validator;
pub mod version;

pub use catalog_history::CatalogHistory;
pub use change::{ColumnChange, ColumnChangeKind, ColumnType, SchemaChange};
pub use error::SchemaCompatError;
pub use validator::{EnlistedTable, SchemaCompatibilityValidator};
pub use version::CatalogVersion;
