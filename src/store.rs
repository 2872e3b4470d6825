//! The store core: one shard per (operator, partition) pair, with
//! per-writer update sessions, a version cache, and the maintenance pass.

mod cache;
mod core;
mod loader;
mod session;

pub use self::core::{StateIter, Store};
pub use self::session::UpdateSession;

use crate::types::{Key, Value};

/// Materialized map at some version. Mutable only while owned by an active
/// session; immutable once published into the cache.
pub type StateMap = std::collections::HashMap<Key, Value>;
