//! Client-side coordinator boundary.
//!
//! The coordinator is an external registry that tracks which process claims
//! the active writer role for each store. This crate carries only the two
//! messages exchanged with it; the transport behind a production
//! implementation is a concern of the embedding system.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::types::StoreId;

/// Identity of the process hosting store instances, as reported to the
/// coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub host: String,
    pub executor_id: String,
}

impl HostIdentity {
    pub fn new(host: impl Into<String>, executor_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            executor_id: executor_id.into(),
        }
    }
}

pub trait CoordinatorClient: Send + Sync {
    /// Advisory: records that this process hosts an active instance for
    /// `id`. The coordinator remembers the most recent claimant.
    fn report_active_instance(&self, id: StoreId, host: &HostIdentity) -> StoreResult<()>;

    /// Asks whether `executor_id` is still the active instance for `id`.
    /// Writers call this before committing side effects downstream, to
    /// fence stale speculative attempts. An unreachable coordinator
    /// answers `false`.
    fn verify_if_instance_active(&self, id: StoreId, executor_id: &str) -> bool;
}

/// Coordinator for single-process embeddings and tests: the latest claimant
/// per store wins.
#[derive(Default)]
pub struct InMemoryCoordinator {
    active: Mutex<HashMap<StoreId, HostIdentity>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_instance(&self, id: StoreId) -> Option<HostIdentity> {
        self.active.lock().get(&id).cloned()
    }

    pub fn deactivate(&self, id: StoreId) {
        self.active.lock().remove(&id);
    }
}

impl CoordinatorClient for InMemoryCoordinator {
    fn report_active_instance(&self, id: StoreId, host: &HostIdentity) -> StoreResult<()> {
        self.active.lock().insert(id, host.clone());
        Ok(())
    }

    fn verify_if_instance_active(&self, id: StoreId, executor_id: &str) -> bool {
        self.active
            .lock()
            .get(&id)
            .map(|claimant| claimant.executor_id == executor_id)
            .unwrap_or(false)
    }
}
