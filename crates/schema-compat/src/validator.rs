use std::sync::Arc;

use engine_primitives::{TableId, Timestamp};
use tracing::instrument;

use crate::catalog_history::CatalogHistory;
use crate::error::SchemaCompatError;
use crate::version::CatalogVersion;

/// A table enlisted by a committing transaction, with the set of columns
/// its writes touched (`None` conservatively means "touched every column",
/// since callers that cannot cheaply compute the exact set should not
/// under-report).
#[derive(Clone, Debug)]
pub struct EnlistedTable {
    pub table_id: TableId,
    pub touched_columns: Option<Vec<String>>,
}

/// Validates that a transaction's schema view stays compatible with every
/// table it touches, across both ends of its lifetime (spec §4.5).
pub struct SchemaCompatibilityValidator {
    history: Arc<dyn CatalogHistory>,
}

impl SchemaCompatibilityValidator {
    pub fn new(history: Arc<dyn CatalogHistory>) -> Self {
        SchemaCompatibilityValidator { history }
    }

    /// Requires every schema change between `row_schema_version` and the
    /// transaction's begin-ts catalog version to be backward-compatible.
    /// Called when a reader observes a row written under an older schema
    /// version than its own transaction's view.
    #[instrument(skip(self))]
    pub async fn validate_backwards(
        &self,
        row_schema_version: u32,
        table_id: TableId,
        tx_begin_ts: Timestamp,
    ) -> Result<(), SchemaCompatError> {
        let tx_version = self.history.catalog_version_at(tx_begin_ts).await;
        let changes = self
            .history
            .changes_between(table_id, CatalogVersion::from(row_schema_version), tx_version)
            .await;
        if changes.iter().any(|c| !c.is_backward_compatible()) {
            return Err(SchemaCompatError::IncompatibleSchema { table_id });
        }
        Ok(())
    }

    /// Requires that, for every enlisted table, all changes between the
    /// transaction's begin-ts and `commit_ts` are forward-compatible for the
    /// rows the transaction wrote. Called on commit; failure aborts the
    /// transaction.
    #[instrument(skip(self, enlisted))]
    pub async fn validate_forward(
        &self,
        tx_begin_ts: Timestamp,
        enlisted: &[EnlistedTable],
        commit_ts: Timestamp,
    ) -> Result<(), SchemaCompatError> {
        let begin_version = self.history.catalog_version_at(tx_begin_ts).await;
        let commit_version = self.history.catalog_version_at(commit_ts).await;
        for table in enlisted {
            let changes = self.history.changes_between(table.table_id, begin_version, commit_version).await;
            if changes.iter().any(|c| c.is_forward_incompatible_for(table.touched_columns.as_deref())) {
                return Err(SchemaCompatError::IncompatibleSchema { table_id: table.table_id });
            }
        }
        Ok(())
    }

    /// Asserts no schema change has been observed for `table_id` between
    /// `tx_begin_ts` and `operation_ts`.
    #[instrument(skip(self))]
    pub async fn fail_if_schema_changed_after_tx_start(
        &self,
        table_id: TableId,
        tx_begin_ts: Timestamp,
        operation_ts: Timestamp,
    ) -> Result<(), SchemaCompatError> {
        let begin_version = self.history.catalog_version_at(tx_begin_ts).await;
        let op_version = self.history.catalog_version_at(operation_ts).await;
        let changes = self.history.changes_between(table_id, begin_version, op_version).await;
        if !changes.is_empty() {
            return Err(SchemaCompatError::SchemaChangedAfterTxStart { table_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ColumnChange, ColumnChangeKind, ColumnType, SchemaChange};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeCatalogHistory {
        version_at: Mutex<Vec<(Timestamp, CatalogVersion)>>,
        changes: Vec<SchemaChange>,
    }

    #[async_trait]
    impl CatalogHistory for FakeCatalogHistory {
        async fn catalog_version_at(&self, ts: Timestamp) -> CatalogVersion {
            self.version_at
                .lock()
                .iter()
                .rev()
                .find(|(at, _)| *at <= ts)
                .map(|(_, v)| *v)
                .unwrap_or(CatalogVersion(0))
        }

        async fn changes_between(&self, table_id: TableId, from: CatalogVersion, to: CatalogVersion) -> Vec<SchemaChange> {
            self.changes
                .iter()
                .filter(|c| c.table_id == table_id && c.version > from && c.version <= to)
                .cloned()
                .collect()
        }
    }

    fn ts(p: u64) -> Timestamp {
        Timestamp::new(p, 0, 1)
    }

    #[tokio::test]
    async fn validate_backwards_accepts_only_widening_changes() {
        let history = FakeCatalogHistory {
            version_at: Mutex::new(vec![(ts(0), CatalogVersion(0)), (ts(10), CatalogVersion(1))]),
            changes: vec![SchemaChange {
                table_id: TableId(1),
                version: CatalogVersion(1),
                columns: vec![ColumnChange {
                    column: "a".into(),
                    kind: ColumnChangeKind::Widened {
                        from: ColumnType::I32,
                        to: ColumnType::I64,
                    },
                }],
            }],
        };
        let validator = SchemaCompatibilityValidator::new(Arc::new(history));
        validator.validate_backwards(0, TableId(1), ts(10)).await.unwrap();
    }

    #[tokio::test]
    async fn validate_backwards_rejects_a_narrowing_change() {
        let history = FakeCatalogHistory {
            version_at: Mutex::new(vec![(ts(0), CatalogVersion(0)), (ts(10), CatalogVersion(1))]),
            changes: vec![SchemaChange {
                table_id: TableId(1),
                version: CatalogVersion(1),
                columns: vec![ColumnChange {
                    column: "a".into(),
                    kind: ColumnChangeKind::Narrowed {
                        from: ColumnType::I64,
                        to: ColumnType::I32,
                    },
                }],
            }],
        };
        let validator = SchemaCompatibilityValidator::new(Arc::new(history));
        let result = validator.validate_backwards(0, TableId(1), ts(10)).await;
        assert!(matches!(result, Err(SchemaCompatError::IncompatibleSchema { .. })));
    }

    #[tokio::test]
    async fn validate_forward_rejects_removal_of_a_touched_column() {
        let history = FakeCatalogHistory {
            version_at: Mutex::new(vec![(ts(0), CatalogVersion(0)), (ts(20), CatalogVersion(1))]),
            changes: vec![SchemaChange {
                table_id: TableId(1),
                version: CatalogVersion(1),
                columns: vec![ColumnChange {
                    column: "a".into(),
                    kind: ColumnChangeKind::Removed,
                }],
            }],
        };
        let validator = SchemaCompatibilityValidator::new(Arc::new(history));
        let enlisted = vec![EnlistedTable {
            table_id: TableId(1),
            touched_columns: Some(vec!["a".to_string()]),
        }];
        let result = validator.validate_forward(ts(0), &enlisted, ts(20)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_if_schema_changed_after_tx_start_passes_when_no_changes() {
        let history = FakeCatalogHistory {
            version_at: Mutex::new(vec![(ts(0), CatalogVersion(0))]),
            changes: vec![],
        };
        let validator = SchemaCompatibilityValidator::new(Arc::new(history));
        validator.fail_if_schema_changed_after_tx_start(TableId(1), ts(0), ts(5)).await.unwrap();
    }
}
