//! Public API surface for store consumers.
//!
//! This module groups lightweight types, error definitions, and configuration
//! so downstream crates can interact with the store without pulling in the
//! storage and runtime implementation details.

pub mod config;
pub mod error;
pub mod types;

pub mod prelude {
    pub use super::config::StoreConfig;
    pub use super::error::{StateStoreError, StoreResult};
    pub use super::types::*;
}
