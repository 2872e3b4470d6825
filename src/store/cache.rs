use std::collections::BTreeMap;
use std::sync::Arc;

use crate::store::StateMap;
use crate::types::Version;

/// In-memory mapping `version -> published map`.
///
/// Owned by a store and guarded by the store lock; no interior locking.
/// Published maps are immutable by convention: the loader and the commit
/// path both insert freshly built maps, and by replay equivalence either
/// insert wins, so `publish` keeps the resident entry.
#[derive(Debug, Default)]
pub(crate) struct MapCache {
    maps: BTreeMap<Version, Arc<StateMap>>,
}

impl MapCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, version: Version) -> Option<Arc<StateMap>> {
        self.maps.get(&version).cloned()
    }

    pub(crate) fn contains(&self, version: Version) -> bool {
        self.maps.contains_key(&version)
    }

    /// Idempotent insert: the first published map for a version stays.
    pub(crate) fn publish(&mut self, version: Version, map: Arc<StateMap>) -> Arc<StateMap> {
        Arc::clone(self.maps.entry(version).or_insert(map))
    }

    /// Replaces the entry for `version`. Used by commit, where the new
    /// working map supersedes whatever an overwritten delta had produced.
    pub(crate) fn replace(&mut self, version: Version, map: Arc<StateMap>) {
        self.maps.insert(version, map);
    }

    pub(crate) fn latest_version(&self) -> Option<Version> {
        self.maps.keys().next_back().copied()
    }

    /// Drops every entry with a version strictly below `horizon`. Returns
    /// how many entries were evicted.
    pub(crate) fn evict_below(&mut self, horizon: Version) -> usize {
        let retained = self.maps.split_off(&horizon);
        let evicted = self.maps.len();
        self.maps = retained;
        evicted
    }

    pub(crate) fn versions(&self) -> Vec<Version> {
        self.maps.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.maps.len()
    }
}
