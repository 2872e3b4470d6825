use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::StoreConfig;
use crate::coordinator::{CoordinatorClient, HostIdentity};
use crate::error::{StateStoreError, StoreResult};
use crate::store::Store;
use crate::types::StoreId;

/// Process-wide mapping `StoreId -> Store`.
///
/// Stores are created lazily on first reference and held until
/// `clear_all`. The first `get` starts one shared maintenance ticker that
/// periodically snapshots and prunes every registered store. Getting a
/// store also reports this process as its active instance to the
/// coordinator; a failed report evicts everything defensively, since this
/// process may have been displaced (on-disk data is untouched).
pub struct StoreRegistry {
    root: PathBuf,
    config: StoreConfig,
    host: HostIdentity,
    coordinator: Arc<dyn CoordinatorClient>,
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    stores: HashMap<StoreId, Arc<Store>>,
    ticker: Option<MaintenanceTicker>,
}

impl StoreRegistry {
    pub fn new(
        root: impl AsRef<Path>,
        config: StoreConfig,
        host: HostIdentity,
        coordinator: Arc<dyn CoordinatorClient>,
    ) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(StateStoreError::NotADirectory { path: root });
        }
        Ok(Arc::new(Self {
            root,
            config,
            host,
            coordinator,
            inner: Mutex::new(RegistryInner::default()),
        }))
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Returns the existing store for `id` or constructs one, then reports
    /// the active instance to the coordinator.
    pub fn get(self: &Arc<Self>, id: StoreId) -> StoreResult<Arc<Store>> {
        let store = {
            let mut inner = self.inner.lock();
            let store = match inner.stores.get(&id) {
                Some(store) => Arc::clone(store),
                None => {
                    let store = Store::open(id, &self.root, self.config.clone())?;
                    inner.stores.insert(id, Arc::clone(&store));
                    store
                }
            };
            if inner.ticker.is_none() {
                inner.ticker = Some(MaintenanceTicker::start(
                    Arc::downgrade(self),
                    self.config.maintenance_interval,
                ));
            }
            store
        };

        if let Err(err) = self.coordinator.report_active_instance(id, &self.host) {
            tracing::warn!(store = %id, %err, "Failed to report active instance; clearing registry");
            self.clear_all();
            return Err(StateStoreError::CoordinatorUnreachable {
                reason: err.to_string(),
            });
        }
        Ok(store)
    }

    /// Asks the coordinator whether this process is still the active
    /// writer for `id`. `false` when the coordinator is unreachable.
    pub fn verify_active(&self, id: StoreId) -> bool {
        self.coordinator
            .verify_if_instance_active(id, &self.host.executor_id)
    }

    pub fn registered_ids(&self) -> Vec<StoreId> {
        self.inner.lock().stores.keys().copied().collect()
    }

    /// Stops the maintenance ticker and drops every store. On-disk state
    /// is untouched; subsequent `get` calls rebuild from the filesystem.
    pub fn clear_all(&self) {
        let ticker = {
            let mut inner = self.inner.lock();
            inner.stores.clear();
            inner.ticker.take()
        };
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }
    }

    fn stores_snapshot(&self) -> Vec<Arc<Store>> {
        self.inner.lock().stores.values().cloned().collect()
    }
}

impl Drop for StoreRegistry {
    fn drop(&mut self) {
        let ticker = self.inner.lock().ticker.take();
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }
    }
}

struct TickerSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Dedicated timer thread shared by all stores of one registry.
struct MaintenanceTicker {
    signal: Arc<TickerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTicker {
    fn start(registry: Weak<StoreRegistry>, period: Duration) -> Self {
        let signal = Arc::new(TickerSignal {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("flowstate-maintenance".to_string())
            .spawn(move || run_ticker(registry, thread_signal, period))
            .expect("failed to spawn maintenance ticker");
        Self {
            signal,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            // The ticker itself can hold the last registry reference, in
            // which case this runs on the ticker thread and must not
            // self-join; the stop flag already terminates the loop.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for MaintenanceTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticker(registry: Weak<StoreRegistry>, signal: Arc<TickerSignal>, period: Duration) {
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if *stopped {
                break;
            }
            let _ = signal.wakeup.wait_for(&mut stopped, period);
            if *stopped {
                break;
            }
        }

        let Some(registry) = registry.upgrade() else {
            break;
        };
        for store in registry.stores_snapshot() {
            store.maintain();
        }
    }
    tracing::debug!("Maintenance ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::InMemoryCoordinator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir_in;

    fn testdata_dir() -> PathBuf {
        let dir = std::env::current_dir().unwrap().join("target/testdata");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn registry_with(
        root: &Path,
        coordinator: Arc<dyn CoordinatorClient>,
    ) -> Arc<StoreRegistry> {
        StoreRegistry::new(
            root,
            StoreConfig::default().with_maintenance_interval(Duration::from_secs(3600)),
            HostIdentity::new("localhost", "exec-1"),
            coordinator,
        )
        .unwrap()
    }

    #[test]
    fn get_returns_the_same_store_instance() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let registry = registry_with(tmp.path(), Arc::new(InMemoryCoordinator::new()));

        let id = StoreId::new(1, 0);
        let first = registry.get(id).unwrap();
        let second = registry.get(id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.registered_ids(), vec![id]);
    }

    #[test]
    fn get_reports_the_active_instance() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let registry = registry_with(tmp.path(), coordinator.clone());

        let id = StoreId::new(2, 1);
        registry.get(id).unwrap();
        assert_eq!(
            coordinator.active_instance(id).unwrap().executor_id,
            "exec-1"
        );
        assert!(registry.verify_active(id));
    }

    #[test]
    fn displaced_executor_fails_verification() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let registry = registry_with(tmp.path(), coordinator.clone());

        let id = StoreId::new(2, 2);
        registry.get(id).unwrap();
        coordinator
            .report_active_instance(id, &HostIdentity::new("other-host", "exec-9"))
            .unwrap();
        assert!(!registry.verify_active(id));
    }

    struct UnreachableCoordinator;

    impl CoordinatorClient for UnreachableCoordinator {
        fn report_active_instance(&self, _id: StoreId, _host: &HostIdentity) -> StoreResult<()> {
            Err(StateStoreError::CoordinatorUnreachable {
                reason: "connection refused".to_string(),
            })
        }

        fn verify_if_instance_active(&self, _id: StoreId, _executor_id: &str) -> bool {
            false
        }
    }

    #[test]
    fn report_failure_clears_the_registry() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let registry = registry_with(tmp.path(), Arc::new(UnreachableCoordinator));

        let err = registry.get(StoreId::new(3, 0)).unwrap_err();
        assert!(matches!(err, StateStoreError::CoordinatorUnreachable { .. }));
        assert!(registry.registered_ids().is_empty());
    }

    #[test]
    fn clear_all_stops_the_ticker_and_drops_stores() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let registry = registry_with(tmp.path(), Arc::new(InMemoryCoordinator::new()));

        registry.get(StoreId::new(4, 0)).unwrap();
        assert!(registry.inner.lock().ticker.is_some());

        registry.clear_all();
        assert!(registry.registered_ids().is_empty());
        assert!(registry.inner.lock().ticker.is_none());

        // The registry keeps working after a clear.
        registry.get(StoreId::new(4, 0)).unwrap();
        assert!(registry.inner.lock().ticker.is_some());
    }

    struct CountingCoordinator {
        reports: AtomicUsize,
    }

    impl CoordinatorClient for CountingCoordinator {
        fn report_active_instance(&self, _id: StoreId, _host: &HostIdentity) -> StoreResult<()> {
            self.reports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn verify_if_instance_active(&self, _id: StoreId, _executor_id: &str) -> bool {
            true
        }
    }

    #[test]
    fn every_get_renews_the_claim() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let coordinator = Arc::new(CountingCoordinator {
            reports: AtomicUsize::new(0),
        });
        let registry = registry_with(tmp.path(), coordinator.clone());

        let id = StoreId::new(5, 0);
        registry.get(id).unwrap();
        registry.get(id).unwrap();
        assert_eq!(coordinator.reports.load(Ordering::SeqCst), 2);
    }
}
