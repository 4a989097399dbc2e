use crate::version::CatalogVersion;
use engine_primitives::TableId;

/// A column's declared type, restricted to the fixed partial order this
/// workspace recognizes for widening (spec §4.5 SUPPLEMENT): integers widen
/// to wider integers, and a bounded string widens to an equal-or-larger
/// bound. Any other pair is considered unrelated (neither widens to the
/// other).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    I32,
    I64,
    F32,
    F64,
    Varchar(u32),
    Bytes,
    Bool,
}

impl ColumnType {
    /// `true` if a value of `self` can always be read back as `other`
    /// without loss — the direction a backward-compatible change must move
    /// in.
    pub fn widens_to(self, other: ColumnType) -> bool {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => true,
            (I32, I64) => true,
            (F32, F64) => true,
            (Varchar(m), Varchar(n)) => n >= m,
            _ => false,
        }
    }
}

/// One column-level change as part of a table's schema evolving from one
/// catalog version to the next.
#[derive(Clone, Debug)]
pub struct ColumnChange {
    pub column: String,
    pub kind: ColumnChangeKind,
}

#[derive(Clone, Debug)]
pub enum ColumnChangeKind {
    /// A new column added with a default/nullable value — existing rows
    /// remain valid without rewriting.
    AddedNullable,
    /// The column's declared type widened along [`ColumnType::widens_to`].
    Widened { from: ColumnType, to: ColumnType },
    /// The column's declared type narrowed — not backward-compatible.
    Narrowed { from: ColumnType, to: ColumnType },
    /// The column was dropped.
    Removed,
}

impl ColumnChange {
    /// Per spec §4.5 SUPPLEMENT: backward-compatible iff it only adds a
    /// nullable column or widens a type.
    pub fn is_backward_compatible(&self) -> bool {
        match &self.kind {
            ColumnChangeKind::AddedNullable => true,
            ColumnChangeKind::Widened { from, to } => from.widens_to(*to),
            ColumnChangeKind::Narrowed { .. } | ColumnChangeKind::Removed => false,
        }
    }

    /// Per spec §4.5 SUPPLEMENT: forward-incompatible for a write touching
    /// this column iff the column was narrowed or removed.
    pub fn is_forward_incompatible(&self) -> bool {
        matches!(self.kind, ColumnChangeKind::Narrowed { .. } | ColumnChangeKind::Removed)
    }
}

/// All column-level changes a table underwent going from one catalog
/// version to the very next one.
#[derive(Clone, Debug)]
pub struct SchemaChange {
    pub table_id: TableId,
    pub version: CatalogVersion,
    pub columns: Vec<ColumnChange>,
}

impl SchemaChange {
    pub fn is_backward_compatible(&self) -> bool {
        self.columns.iter().all(ColumnChange::is_backward_compatible)
    }

    /// `true` if this change is forward-incompatible for a write that
    /// touched `touched_columns` (`None` conservatively means "touched every
    /// column").
    pub fn is_forward_incompatible_for(&self, touched_columns: Option<&[String]>) -> bool {
        self.columns.iter().any(|c| {
            c.is_forward_incompatible()
                && touched_columns.map(|cols| cols.iter().any(|t| t == &c.column)).unwrap_or(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_widens_to_i64_but_not_reverse() {
        assert!(ColumnType::I32.widens_to(ColumnType::I64));
        assert!(!ColumnType::I64.widens_to(ColumnType::I32));
    }

    #[test]
    fn varchar_widens_only_to_larger_or_equal_bound() {
        assert!(ColumnType::Varchar(10).widens_to(ColumnType::Varchar(20)));
        assert!(ColumnType::Varchar(10).widens_to(ColumnType::Varchar(10)));
        assert!(!ColumnType::Varchar(10).widens_to(ColumnType::Varchar(5)));
    }

    #[test]
    fn added_nullable_and_widened_are_backward_compatible() {
        let change = SchemaChange {
            table_id: TableId(1),
            version: CatalogVersion(2),
            columns: vec![
                ColumnChange {
                    column: "a".into(),
                    kind: ColumnChangeKind::AddedNullable,
                },
                ColumnChange {
                    column: "b".into(),
                    kind: ColumnChangeKind::Widened {
                        from: ColumnType::I32,
                        to: ColumnType::I64,
                    },
                },
            ],
        };
        assert!(change.is_backward_compatible());
    }

    #[test]
    fn narrowed_column_is_not_backward_compatible() {
        let change = SchemaChange {
            table_id: TableId(1),
            version: CatalogVersion(2),
            columns: vec![ColumnChange {
                column: "a".into(),
                kind: ColumnChangeKind::Narrowed {
                    from: ColumnType::I64,
                    to: ColumnType::I32,
                },
            }],
        };
        assert!(!change.is_backward_compatible());
    }

    #[test]
    fn forward_incompatibility_only_applies_to_touched_columns() {
        let change = SchemaChange {
            table_id: TableId(1),
            version: CatalogVersion(2),
            columns: vec![ColumnChange {
                column: "a".into(),
                kind: ColumnChangeKind::Removed,
            }],
        };
        assert!(change.is_forward_incompatible_for(Some(&["a".to_string()])));
        assert!(!change.is_forward_incompatible_for(Some(&["b".to_string()])));
        assert!(change.is_forward_incompatible_for(None));
    }
}
