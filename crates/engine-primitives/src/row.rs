use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An opaque row payload. The core never interprets `tuple_bytes` beyond
/// equality (for compare-and-set requests like `RW_REPLACE`) and byte-length
/// (for metrics). Per spec, equality compares only `tuple_bytes` —
/// `schema_version` is metadata for the schema compatibility validator, not
/// part of a row's logical identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinaryRow {
    pub schema_version: u32,
    pub tuple_bytes: Bytes,
}

impl BinaryRow {
    pub fn new(schema_version: u32, tuple_bytes: impl Into<Bytes>) -> Self {
        BinaryRow {
            schema_version,
            tuple_bytes: tuple_bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.tuple_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_bytes.is_empty()
    }
}

impl PartialEq for BinaryRow {
    fn eq(&self, other: &Self) -> bool {
        self.tuple_bytes == other.tuple_bytes
    }
}

impl Eq for BinaryRow {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_schema_version() {
        let a = BinaryRow::new(1, &b"abc"[..]);
        let b = BinaryRow::new(2, &b"abc"[..]);
        assert_eq!(a, b, "rows with equal tuple bytes compare equal regardless of schema_version");
    }

    #[test]
    fn inequality_on_differing_bytes() {
        let a = BinaryRow::new(1, &b"abc"[..]);
        let b = BinaryRow::new(1, &b"xyz"[..]);
        assert_ne!(a, b);
    }
}
