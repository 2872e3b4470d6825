use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier of the stateful operator owning a group of partitions.
pub type OperatorId = i64;

/// Partition index within one operator.
pub type PartitionId = i32;

/// Monotonically increasing identifier for a committed state of one
/// partition. Version 0 is the first writable version; its predecessor is
/// the empty map.
pub type Version = i64;

/// Opaque key bytes. Keys are compared by byte equality only.
pub type Key = Vec<u8>;

/// Opaque value bytes.
pub type Value = Vec<u8>;

/// Uniquely identifies one shard: the state of one (operator, partition)
/// pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId {
    pub operator_id: OperatorId,
    pub partition_id: PartitionId,
}

impl StoreId {
    pub fn new(operator_id: OperatorId, partition_id: PartitionId) -> Self {
        Self {
            operator_id,
            partition_id,
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op={} part={}", self.operator_id, self.partition_id)
    }
}

/// One (key, value) pair as stored in snapshot files and served by
/// iterators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

/// One event in a delta file. Replaying the events of `<v>.delta` in file
/// order transforms version v-1 into version v.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreUpdate {
    ValueUpdated { key: Key, value: Value },
    KeyRemoved { key: Key },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Delta,
    Snapshot,
}

/// A parsed entry of a store directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFile {
    pub version: Version,
    pub path: PathBuf,
    pub kind: FileKind,
}
