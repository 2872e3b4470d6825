use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::error::{StateStoreError, StoreResult};
use crate::storage::codec::{self, FrameOptions};
use crate::storage::{self, FileLayout};
use crate::store::cache::MapCache;
use crate::store::loader;
use crate::store::session::UpdateSession;
use crate::store::StateMap;
use crate::types::{FileKind, Record, StoreId, Version};

/// One shard: the versioned state of one (operator, partition) pair.
///
/// The store lock guards the version cache and serializes the
/// rename+publish step of a commit. Session staging state lives outside
/// the store and needs no lock.
#[derive(Debug)]
pub struct Store {
    id: StoreId,
    layout: FileLayout,
    config: StoreConfig,
    cache: Mutex<MapCache>,
}

impl Store {
    pub(crate) fn open(
        id: StoreId,
        root: impl AsRef<Path>,
        config: StoreConfig,
    ) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let layout = FileLayout::new(root, id);
        layout.ensure_dir()?;
        Ok(Arc::new(Self {
            id,
            layout,
            config,
            cache: Mutex::new(MapCache::new()),
        }))
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn layout(&self) -> &FileLayout {
        &self.layout
    }

    pub(crate) fn frame_options(&self) -> FrameOptions {
        FrameOptions {
            compress: self.config.compress,
            compression_level: self.config.compression_level,
        }
    }

    /// Starts a session in the INITIALIZED state.
    pub fn update_session(self: &Arc<Self>) -> UpdateSession {
        UpdateSession::new(Arc::clone(self))
    }

    /// Starts a session prepared to produce `version`.
    pub fn prepare_for_updates(self: &Arc<Self>, version: Version) -> StoreResult<UpdateSession> {
        let mut session = self.update_session();
        session.prepare(version)?;
        Ok(session)
    }

    pub(crate) fn load_map(&self, version: Version) -> StoreResult<Arc<StateMap>> {
        let mut cache = self.cache.lock();
        loader::load_map(&self.layout, &mut cache, version)
    }

    /// Lazy iteration over the records of `version`.
    pub fn iterator(&self, version: Version) -> StoreResult<StateIter> {
        if version < 0 {
            return Err(StateStoreError::NegativeVersion { version });
        }
        Ok(StateIter::new(self.load_map(version)?))
    }

    /// The greatest version known to this store: maximum of the versions
    /// on disk and the versions in the cache.
    pub fn latest_version(&self) -> StoreResult<Option<Version>> {
        let on_disk = self.layout.latest_version()?;
        let cached = self.cache.lock().latest_version();
        Ok(match (on_disk, cached) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        })
    }

    /// Iteration over the latest version; empty when the store has no
    /// committed version yet.
    pub fn latest_iterator(&self) -> StoreResult<StateIter> {
        match self.latest_version()? {
            Some(version) => self.iterator(version),
            None => Ok(StateIter::new(Arc::new(StateMap::new()))),
        }
    }

    /// The commit linearization point: atomically promotes the staged
    /// temp file to `<version>.delta` (overwrite permitted) and publishes
    /// the working map, both under the store lock.
    pub(crate) fn publish_commit(
        &self,
        version: Version,
        temp_path: &Path,
        working: StateMap,
    ) -> StoreResult<()> {
        let final_path = self.layout.delta_path(version);
        let mut cache = self.cache.lock();
        std::fs::rename(temp_path, &final_path)?;
        // The rename alone makes the version visible; the directory sync
        // only hardens it against power loss. Failing the commit here
        // would leave readers observing content the caller was told did
        // not commit, so the sync is best-effort.
        if let Err(err) = storage::sync_directory(self.layout.dir()) {
            tracing::warn!(store = %self.id, version, ?err, "Directory sync after commit rename failed");
        }
        cache.replace(version, Arc::new(working));
        Ok(())
    }

    /// One maintenance pass: snapshot a long delta chain, then prune
    /// files and cache entries below the retention horizon. Errors are
    /// logged and swallowed; the next tick retries.
    pub fn maintain(&self) {
        if let Err(err) = self.maintain_snapshot() {
            tracing::warn!(store = %self.id, ?err, "Snapshot maintenance failed");
        }
        if let Err(err) = self.maintain_cleanup() {
            tracing::warn!(store = %self.id, ?err, "Retention cleanup failed");
        }
    }

    fn maintain_snapshot(&self) -> StoreResult<()> {
        let files = self.layout.enumerate()?;
        let Some(last) = files.last() else {
            return Ok(());
        };
        let latest = last.version;

        // Length of the consecutive delta run ending at the latest
        // version; a snapshot anywhere in the listing restarts the count.
        let mut run: u64 = 0;
        for file in &files {
            match file.kind {
                FileKind::Snapshot => run = 0,
                FileKind::Delta => run += 1,
            }
        }
        if run <= self.config.max_delta_chain_for_snapshots {
            return Ok(());
        }

        let Some(map) = self.cache.lock().get(latest) else {
            // Another process is the active writer for this partition.
            tracing::debug!(store = %self.id, version = latest, "Skipping snapshot; latest version not cached");
            return Ok(());
        };

        // Serialize and rename outside the lock so writers are not
        // stalled behind the snapshot.
        let temp = self.layout.temp_path();
        let result = codec::write_records(
            &temp,
            map.iter().map(|(key, value)| Record {
                key: key.clone(),
                value: value.clone(),
            }),
            self.frame_options(),
        )
        .and_then(|()| {
            std::fs::rename(&temp, self.layout.snapshot_path(latest))?;
            storage::sync_directory(self.layout.dir())
        });
        if let Err(err) = result {
            let _ = std::fs::remove_file(&temp);
            return Err(err);
        }

        tracing::info!(store = %self.id, version = latest, delta_chain = run, "Wrote snapshot");
        Ok(())
    }

    fn maintain_cleanup(&self) -> StoreResult<()> {
        let all = self.layout.list_all()?;
        let Some(latest) = all.iter().map(|file| file.version).max() else {
            return Ok(());
        };
        let retain = Version::try_from(self.config.num_batches_to_retain).unwrap_or(Version::MAX);
        let earliest = latest.saturating_sub(retain);
        if earliest < 0 {
            return Ok(());
        }

        // The covering file for the earliest retained version: the
        // greatest snapshot at or below it, else the start of the delta
        // chain. Everything strictly below stays deletable; the horizon
        // only moves forward, so racing commits at newer versions are
        // unaffected.
        let covering = all
            .iter()
            .filter(|file| file.kind == FileKind::Snapshot && file.version <= earliest)
            .map(|file| file.version)
            .max()
            .or_else(|| {
                all.iter()
                    .filter(|file| file.kind == FileKind::Delta)
                    .map(|file| file.version)
                    .min()
            });
        let Some(covering) = covering else {
            return Ok(());
        };

        let evicted = self.cache.lock().evict_below(earliest);
        if evicted > 0 {
            tracing::debug!(store = %self.id, horizon = earliest, evicted, "Evicted cached versions");
        }

        for file in &all {
            if file.version < covering {
                std::fs::remove_file(&file.path)?;
                tracing::debug!(store = %self.id, version = file.version, path = ?file.path, "Deleted retired store file");
            }
        }
        Ok(())
    }

    /// Versions currently resident in the cache, ascending.
    pub fn cached_versions(&self) -> Vec<Version> {
        self.cache.lock().versions()
    }
}

/// Lazy iteration over the records of one published version. Holds the
/// published map alive; values are cloned on demand.
pub struct StateIter {
    map: Arc<StateMap>,
    keys: std::vec::IntoIter<crate::types::Key>,
}

impl StateIter {
    pub(crate) fn new(map: Arc<StateMap>) -> Self {
        let keys: Vec<_> = map.keys().cloned().collect();
        Self {
            map,
            keys: keys.into_iter(),
        }
    }
}

impl Iterator for StateIter {
    type Item = (crate::types::Key, crate::types::Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            if let Some(value) = self.map.get(&key) {
                return Some((key, value.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir_in;

    fn testdata_dir() -> PathBuf {
        let dir = std::env::current_dir().unwrap().join("target/testdata");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn open_store(root: &Path, config: StoreConfig) -> Arc<Store> {
        Store::open(StoreId::new(1, 0), root, config).unwrap()
    }

    fn commit_kv(store: &Arc<Store>, version: Version, key: &str, value: &str) {
        let mut session = store.prepare_for_updates(version).unwrap();
        session
            .update(key.as_bytes().to_vec(), |_| value.as_bytes().to_vec())
            .unwrap();
        session.commit().unwrap();
    }

    fn entries(store: &Store, version: Version) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = store
            .iterator(version)
            .unwrap()
            .map(|(k, v)| {
                (
                    String::from_utf8(k).unwrap(),
                    String::from_utf8(v).unwrap(),
                )
            })
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn iterator_rejects_negative_versions() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let store = open_store(tmp.path(), StoreConfig::default());
        assert!(matches!(
            store.iterator(-3),
            Err(StateStoreError::NegativeVersion { version: -3 })
        ));
    }

    #[test]
    fn latest_iterator_of_an_empty_store_is_empty() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let store = open_store(tmp.path(), StoreConfig::default());
        assert_eq!(store.latest_version().unwrap(), None);
        assert!(store.latest_iterator().unwrap().next().is_none());
    }

    #[test]
    fn maintain_snapshots_a_long_delta_chain() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let config = StoreConfig::default()
            .with_max_delta_chain_for_snapshots(2)
            .with_num_batches_to_retain(100);
        let store = open_store(tmp.path(), config);

        for version in 0..3 {
            commit_kv(&store, version, &format!("k{version}"), "v");
        }
        store.maintain();
        // Run of 3 deltas exceeds the threshold of 2.
        assert!(store.layout().snapshot_path(2).exists());
        assert_eq!(entries(&store, 2).len(), 3);
    }

    #[test]
    fn maintain_skips_snapshot_when_latest_is_not_cached() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let config = StoreConfig::default()
            .with_max_delta_chain_for_snapshots(1)
            .with_num_batches_to_retain(100);
        let store = open_store(tmp.path(), config.clone());

        for version in 0..3 {
            commit_kv(&store, version, "k", &format!("v{version}"));
        }

        // A fresh instance over the same directory has a cold cache, as
        // when another process is the active writer.
        let bystander = open_store(tmp.path(), config);
        bystander.maintain();
        assert!(!bystander.layout().snapshot_path(2).exists());

        store.maintain();
        assert!(store.layout().snapshot_path(2).exists());
    }

    #[test]
    fn snapshot_trigger_counts_only_the_run_since_the_last_snapshot() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let config = StoreConfig::default()
            .with_max_delta_chain_for_snapshots(2)
            .with_num_batches_to_retain(100);
        let store = open_store(tmp.path(), config);

        for version in 0..3 {
            commit_kv(&store, version, "k", &format!("v{version}"));
        }
        store.maintain();
        assert!(store.layout().snapshot_path(2).exists());

        // Two more deltas: the run since 2.snapshot is 2, not 5.
        commit_kv(&store, 3, "k", "v3");
        commit_kv(&store, 4, "k", "v4");
        store.maintain();
        assert!(!store.layout().snapshot_path(4).exists());

        commit_kv(&store, 5, "k", "v5");
        store.maintain();
        assert!(store.layout().snapshot_path(5).exists());
    }

    #[test]
    fn cleanup_prunes_files_and_cache_below_the_horizon() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let config = StoreConfig::default()
            .with_max_delta_chain_for_snapshots(2)
            .with_num_batches_to_retain(2);
        let store = open_store(tmp.path(), config);

        for version in 0..3 {
            commit_kv(&store, version, "k", &format!("v{version}"));
        }
        store.maintain();
        assert!(store.layout().snapshot_path(2).exists());

        for version in 3..6 {
            commit_kv(&store, version, "k", &format!("v{version}"));
        }
        // latest = 5, earliest = 3, covering snapshot = 2: deltas 0 and 1
        // fall away, everything from the snapshot on stays readable.
        store.maintain();
        assert!(!store.layout().delta_path(0).exists());
        assert!(!store.layout().delta_path(1).exists());
        assert!(store.layout().snapshot_path(2).exists());
        assert!(store.layout().delta_path(3).exists());
        assert_eq!(entries(&store, 3), vec![("k".to_string(), "v3".to_string())]);
        assert!(store.cached_versions().iter().all(|v| *v >= 3));
    }

    #[test]
    fn cleanup_without_a_covering_snapshot_keeps_the_chain() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let config = StoreConfig::default()
            .with_max_delta_chain_for_snapshots(100)
            .with_num_batches_to_retain(2);
        let store = open_store(tmp.path(), config);

        for version in 0..6 {
            commit_kv(&store, version, "k", &format!("v{version}"));
        }
        // No snapshot exists, so version 3's chain still starts at
        // 0.delta; nothing may be deleted.
        store.maintain();
        for version in 0..6 {
            assert!(store.layout().delta_path(version).exists());
        }
        assert_eq!(entries(&store, 3), vec![("k".to_string(), "v3".to_string())]);
    }

    #[test]
    fn latest_version_covers_disk_and_cache() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let store = open_store(tmp.path(), StoreConfig::default());

        commit_kv(&store, 0, "k", "v0");
        commit_kv(&store, 1, "k", "v1");
        assert_eq!(store.latest_version().unwrap(), Some(1));

        // A cold instance sees the committed files.
        let reopened = open_store(tmp.path(), StoreConfig::default());
        assert_eq!(reopened.latest_version().unwrap(), Some(1));
        let latest: Vec<_> = reopened.latest_iterator().unwrap().collect();
        assert_eq!(latest, vec![(b"k".to_vec(), b"v1".to_vec())]);
    }
}
