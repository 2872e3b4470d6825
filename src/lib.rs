//! # Flowstate
//!
//! A versioned, partitioned key-value state store backing streaming
//! aggregation operators.
//!
//! ## Features
//!
//! - **Version chains**: each micro-batch commit appends one immutable
//!   delta file; any retained version is rebuilt on demand
//! - **Atomic publication**: a commit becomes visible through one rename,
//!   safe under speculative task re-execution
//! - **Background maintenance**: long delta chains are compacted into
//!   snapshots, old versions pruned from disk and cache
//! - **Opaque payloads**: keys and values are byte slices; row schemas
//!   stay in the calling layer
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowstate::{
//!     HostIdentity, InMemoryCoordinator, StoreConfig, StoreId, StoreRegistry,
//! };
//!
//! let registry = StoreRegistry::new(
//!     "./state",
//!     StoreConfig::default(),
//!     HostIdentity::new("localhost", "exec-1"),
//!     Arc::new(InMemoryCoordinator::new()),
//! )?;
//!
//! let store = registry.get(StoreId::new(1, 0))?;
//! let mut session = store.prepare_for_updates(0)?;
//! session.update(b"visits".to_vec(), |_| 1u64.to_le_bytes().to_vec())?;
//! session.commit()?;
//!
//! for (key, value) in store.iterator(0)? {
//!     println!("{key:?} -> {value:?}");
//! }
//! # Ok::<(), flowstate::StateStoreError>(())
//! ```
//!
//! The coordinator boundary is pluggable: implement [`CoordinatorClient`]
//! to fence speculative writers through an external registry, or use
//! [`InMemoryCoordinator`] for single-process embeddings.

pub mod api;
pub mod coordinator;
pub mod runtime;
pub mod storage;
pub mod store;

pub use crate::api::{config, error, types};

pub use api::config::StoreConfig;
pub use api::error::{StateStoreError, StoreResult};
pub use api::types::*;
pub use coordinator::{CoordinatorClient, HostIdentity, InMemoryCoordinator};
pub use runtime::StoreRegistry;
pub use storage::{FileLayout, RecordReader, UpdateReader};
pub use store::{StateIter, StateMap, Store, UpdateSession};
