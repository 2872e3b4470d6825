use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{StateStoreError, StoreResult};
use crate::storage::codec::{self, FrameWriter, UpdateReader};
use crate::store::core::{StateIter, Store};
use crate::store::StateMap;
use crate::types::{FileKind, Key, StoreUpdate, Value, Version};

/// Per-writer staging for one in-flight version transition.
///
/// ```text
///  INITIALIZED --prepare(v)--> PREPARED --commit()--> COMMITTED
///                     ^                      |
///                     |                 (failure)
///                     +---reset()-----------+
/// ```
///
/// Every mutation is journaled to a temp file before it touches the
/// working map; `commit` promotes the temp file to `<v>.delta` with an
/// atomic rename. Readers never open the temp name, so a partially
/// written journal cannot corrupt version v. Sessions are per-writer
/// values: do not share one across threads.
pub struct UpdateSession {
    store: Arc<Store>,
    state: SessionState,
}

enum SessionState {
    Initialized,
    Prepared(Box<PreparedState>),
    Committed { version: Version },
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Initialized => "initialized",
            SessionState::Prepared(_) => "prepared",
            SessionState::Committed { .. } => "committed",
        }
    }
}

struct PreparedState {
    version: Version,
    working: StateMap,
    writer: FrameWriter,
}

impl UpdateSession {
    pub(crate) fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            state: SessionState::Initialized,
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Loads the predecessor of `version` into a fresh working map and
    /// opens the temp journal. Any prior staging state is discarded
    /// first.
    pub fn prepare(&mut self, version: Version) -> StoreResult<()> {
        self.reset();
        if version < 0 {
            return Err(StateStoreError::NegativeVersion { version });
        }
        self.store.layout().ensure_dir()?;

        let predecessor = self.store.load_map(version - 1)?;
        let working = (*predecessor).clone();
        let writer = FrameWriter::create(
            self.store.layout().temp_path(),
            FileKind::Delta,
            self.store.frame_options(),
        )?;

        self.state = SessionState::Prepared(Box::new(PreparedState {
            version,
            working,
            writer,
        }));
        Ok(())
    }

    fn prepared_mut(&mut self, operation: &'static str) -> StoreResult<&mut PreparedState> {
        match &mut self.state {
            SessionState::Prepared(prepared) => Ok(prepared),
            other => Err(StateStoreError::InvalidState {
                operation,
                state: other.name(),
            }),
        }
    }

    /// Computes the new value from the current one (if any), stores it in
    /// the working map, and journals a `ValueUpdated` event.
    pub fn update<F>(&mut self, key: Key, f: F) -> StoreResult<()>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let prepared = self.prepared_mut("update")?;
        let value = f(prepared.working.get(&key));
        prepared.writer.append(&StoreUpdate::ValueUpdated {
            key: key.clone(),
            value: value.clone(),
        })?;
        prepared.working.insert(key, value);
        Ok(())
    }

    /// Removes every key matching the predicate, journaling a
    /// `KeyRemoved` event per removal. Returns how many keys were
    /// removed. The predicate sees keys only.
    pub fn remove<P>(&mut self, mut predicate: P) -> StoreResult<usize>
    where
        P: FnMut(&[u8]) -> bool,
    {
        let prepared = self.prepared_mut("remove")?;
        // Collect first so removal never invalidates the iteration.
        let doomed: Vec<Key> = prepared
            .working
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        let removed = doomed.len();
        for key in doomed {
            prepared.working.remove(&key);
            prepared.writer.append(&StoreUpdate::KeyRemoved { key })?;
        }
        Ok(removed)
    }

    /// Seals the temp journal and atomically publishes the new version:
    /// rename to `<v>.delta` (overwriting a speculative predecessor if
    /// one exists) and cache publication happen under the store lock. On
    /// failure the session reverts to INITIALIZED and `<v>.delta` is
    /// unchanged; the writer may retry from `prepare`.
    pub fn commit(&mut self) -> StoreResult<Version> {
        let state = std::mem::replace(&mut self.state, SessionState::Initialized);
        let prepared = match state {
            SessionState::Prepared(prepared) => *prepared,
            other => {
                let name = other.name();
                self.state = other;
                return Err(StateStoreError::InvalidState {
                    operation: "commit",
                    state: name,
                });
            }
        };

        let PreparedState {
            version,
            working,
            writer,
        } = prepared;
        let temp: PathBuf = writer.path().to_path_buf();

        if let Err(err) = writer
            .finish()
            .and_then(|()| self.store.publish_commit(version, &temp, working))
        {
            let _ = std::fs::remove_file(&temp);
            return Err(err);
        }

        tracing::debug!(store = %self.store.id(), version, "Committed version");
        self.state = SessionState::Committed { version };
        Ok(version)
    }

    /// The universal cancel primitive: closes the temp journal if open,
    /// deletes the temp file, and returns to INITIALIZED. Safe from any
    /// state.
    pub fn reset(&mut self) {
        if let SessionState::Prepared(prepared) =
            std::mem::replace(&mut self.state, SessionState::Initialized)
        {
            let temp = prepared.writer.path().to_path_buf();
            drop(prepared);
            if let Err(err) = std::fs::remove_file(&temp) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = ?temp, ?err, "Failed to delete staging file on reset");
                }
            }
        }
    }

    pub fn last_committed_version(&self) -> Option<Version> {
        match self.state {
            SessionState::Committed { version } => Some(version),
            _ => None,
        }
    }

    /// Lazy iteration over the records of the just-committed version,
    /// served from the cache.
    pub fn last_committed_data(&self) -> StoreResult<StateIter> {
        match self.state {
            SessionState::Committed { version } => self.store.iterator(version),
            ref other => Err(StateStoreError::InvalidState {
                operation: "last_committed_data",
                state: other.name(),
            }),
        }
    }

    /// Lazy iteration over the events of the just-committed delta file,
    /// re-read from disk.
    pub fn last_committed_updates(&self) -> StoreResult<UpdateReader> {
        match self.state {
            SessionState::Committed { version } => {
                codec::read_updates(self.store.layout().delta_path(version))
            }
            ref other => Err(StateStoreError::InvalidState {
                operation: "last_committed_updates",
                state: other.name(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn staged_temp_path(&self) -> Option<PathBuf> {
        match &self.state {
            SessionState::Prepared(prepared) => Some(prepared.writer.path().to_path_buf()),
            _ => None,
        }
    }
}

/// A session dropped without commit must not leave its journal behind.
impl Drop for UpdateSession {
    fn drop(&mut self) {
        self.reset();
    }
}
