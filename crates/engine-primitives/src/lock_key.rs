use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{RowId, TableId};

/// Identifies an index by id; defined here (rather than re-exporting a
/// catalog type) because the lock manager only needs an opaque handle, not
/// index metadata.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u32);

/// The resource a [`crate::LockMode`] applies to.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum LockKey {
    /// The whole table, taken in IS/IX to announce intent before any
    /// row/index-level lock under it.
    Table(TableId),
    /// A single row of a table.
    Row(TableId, RowId),
    /// A whole secondary index, taken in IS/IX the same way `Table` is.
    Index(IndexId),
    /// A single key within an index (e.g. a unique index entry being
    /// inserted/looked-up).
    IndexKey(IndexId, Bytes),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Table(t) => write!(f, "table({t})"),
            LockKey::Row(t, r) => write!(f, "row({t},{r})"),
            LockKey::Index(i) => write!(f, "index({})", i.0),
            LockKey::IndexKey(i, k) => write!(f, "index_key({},{}B)", i.0, k.len()),
        }
    }
}

/// The standard multi-granularity lock modes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Intent shared: announces an intent to take `S` further down.
    IS,
    /// Intent exclusive: announces an intent to take `X`/`SIX` further down.
    IX,
    /// Shared.
    S,
    /// Shared + intent exclusive: holder may read the whole resource and
    /// intends to exclusively lock parts of it.
    SIX,
    /// Exclusive.
    X,
}

impl LockMode {
    /// The standard multi-granularity compatibility matrix. Two lock modes
    /// held concurrently by *different* transactions on the same key are
    /// compatible iff this returns `true`.
    pub const fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IS, IS) | (IS, IX) | (IS, S) | (IS, SIX) => true,
            (IX, IS) | (IX, IX) => true,
            (S, IS) | (S, S) => true,
            (SIX, IS) => true,
            (X, _) | (_, X) => false,
            (IX, S) | (IX, SIX) => false,
            (S, IX) | (S, SIX) => false,
            (SIX, IX) | (SIX, S) | (SIX, SIX) => false,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::IS => "IS",
            LockMode::IX => "IX",
            LockMode::S => "S",
            LockMode::SIX => "SIX",
            LockMode::X => "X",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_is_compatible_with_nothing_but_itself_excluded_too() {
        for mode in [LockMode::IS, LockMode::IX, LockMode::S, LockMode::SIX, LockMode::X] {
            assert!(!LockMode::X.compatible_with(mode));
            assert!(!mode.compatible_with(LockMode::X));
        }
    }

    #[test]
    fn is_is_compatible_with_everything_but_x() {
        assert!(LockMode::IS.compatible_with(LockMode::IS));
        assert!(LockMode::IS.compatible_with(LockMode::IX));
        assert!(LockMode::IS.compatible_with(LockMode::S));
        assert!(LockMode::IS.compatible_with(LockMode::SIX));
        assert!(!LockMode::IS.compatible_with(LockMode::X));
    }

    #[test]
    fn ix_incompatible_with_s_and_six() {
        assert!(!LockMode::IX.compatible_with(LockMode::S));
        assert!(!LockMode::IX.compatible_with(LockMode::SIX));
        assert!(LockMode::IX.compatible_with(LockMode::IX));
    }

    #[test]
    fn matrix_is_symmetric() {
        let modes = [LockMode::IS, LockMode::IX, LockMode::S, LockMode::SIX, LockMode::X];
        for &a in &modes {
            for &b in &modes {
                assert_eq!(
                    a.compatible_with(b),
                    b.compatible_with(a),
                    "asymmetric for ({a:?}, {b:?})"
                );
            }
        }
    }
}
