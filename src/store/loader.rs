//! Materializes versions from the on-disk chain.

use std::sync::Arc;

use crate::error::{StateStoreError, StoreResult};
use crate::storage::codec;
use crate::storage::FileLayout;
use crate::store::cache::MapCache;
use crate::store::StateMap;
use crate::types::{StoreUpdate, Version};

/// Loads the map at `version`: nearest base at or below it (cache entry,
/// snapshot file, or the empty pre-0 map), then in-order replay of the
/// delta files up to `version`. The result is published into the cache.
///
/// The caller holds the store lock for the duration, so disk reads
/// serialize against commits on the same store.
pub(crate) fn load_map(
    layout: &FileLayout,
    cache: &mut MapCache,
    version: Version,
) -> StoreResult<Arc<StateMap>> {
    if version < 0 {
        return Ok(Arc::new(StateMap::new()));
    }
    if let Some(map) = cache.get(version) {
        return Ok(map);
    }

    // Walk backwards collecting the delta versions that still need replay,
    // until a base materializes. The maintainer's snapshot policy bounds
    // the walk in practice.
    let mut replay = Vec::new();
    let mut map = {
        let mut candidate = version;
        loop {
            if candidate < 0 {
                break StateMap::new();
            }
            if let Some(cached) = cache.get(candidate) {
                break (*cached).clone();
            }
            let snapshot = layout.snapshot_path(candidate);
            if snapshot.exists() {
                break read_snapshot(&snapshot)?;
            }
            replay.push(candidate);
            candidate -= 1;
        }
    };

    for delta_version in replay.into_iter().rev() {
        apply_delta(layout, delta_version, &mut map)?;
    }

    tracing::debug!(version, entries = map.len(), dir = ?layout.dir(), "Materialized version");
    Ok(cache.publish(version, Arc::new(map)))
}

fn read_snapshot(path: &std::path::Path) -> StoreResult<StateMap> {
    let mut map = StateMap::new();
    for record in codec::read_records(path)? {
        let record = record?;
        map.insert(record.key, record.value);
    }
    Ok(map)
}

fn apply_delta(layout: &FileLayout, version: Version, map: &mut StateMap) -> StoreResult<()> {
    let path = layout.delta_path(version);
    if !path.exists() {
        return Err(StateStoreError::MissingDelta { version, path });
    }
    for update in codec::read_updates(&path)? {
        match update? {
            StoreUpdate::ValueUpdated { key, value } => {
                map.insert(key, value);
            }
            StoreUpdate::KeyRemoved { key } => {
                map.remove(&key);
            }
        }
    }
    Ok(())
}
