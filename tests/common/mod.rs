#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flowstate::{
    HostIdentity, InMemoryCoordinator, StateIter, StoreConfig, StoreRegistry,
};
use tempfile::{tempdir_in, TempDir};

pub fn testdata_dir() -> PathBuf {
    let dir = std::env::current_dir().unwrap().join("target/testdata");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn new_tempdir() -> TempDir {
    tempdir_in(testdata_dir()).unwrap()
}

pub fn new_registry(root: &Path, config: StoreConfig) -> Arc<StoreRegistry> {
    StoreRegistry::new(
        root,
        config,
        HostIdentity::new("localhost", "exec-1"),
        Arc::new(InMemoryCoordinator::new()),
    )
    .unwrap()
}

/// Registry with a ticker period long enough to never fire during a test,
/// so maintenance only runs when a test drives it explicitly.
pub fn quiet_registry(root: &Path, config: StoreConfig) -> Arc<StoreRegistry> {
    new_registry(
        root,
        config.with_maintenance_interval(Duration::from_secs(3600)),
    )
}

pub fn bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

pub fn sorted_entries(iter: StateIter) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = iter
        .map(|(key, value)| {
            (
                String::from_utf8(key).unwrap(),
                String::from_utf8(value).unwrap(),
            )
        })
        .collect();
    pairs.sort();
    pairs
}

pub fn pair(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Names of the `temp-*` staging files currently present in a store
/// directory.
pub fn staging_files(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
        .filter(|name| name.starts_with("temp-"))
        .collect()
}

/// Polls `condition` until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
