//! Key/value records carried through a conversion.
//!
//! Payloads are opaque; only their order matters.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single key/value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Offset of the record within its partition
    pub offset: u64,
    /// Record key (may be empty)
    pub key: Bytes,
    /// Record payload
    pub value: Bytes,
}

impl Record {
    pub fn new(offset: u64, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Record {
            offset,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Record with an empty key
    pub fn unkeyed(offset: u64, value: impl Into<Bytes>) -> Self {
        Record::new(offset, Bytes::new(), value)
    }
}
