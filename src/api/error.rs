use std::path::PathBuf;

use thiserror::Error;

use crate::types::Version;

pub type StoreResult<T> = Result<T, StateStoreError>;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("delta file for version {version} missing at {path:?}")]
    MissingDelta { version: Version, path: PathBuf },

    #[error("store file corrupted at {path:?}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    #[error("version {version} must be non-negative")]
    NegativeVersion { version: Version },

    #[error("invalid configuration: {field} must be at least {min}, got {value}")]
    InvalidConfiguration {
        field: &'static str,
        min: u64,
        value: u64,
    },

    #[error("store path {path:?} exists but is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("coordinator unreachable: {reason}")]
    CoordinatorUnreachable { reason: String },
}
