use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{StateStoreError, StoreResult};
use crate::types::{FileKind, StoreFile, StoreId, Version};

const DELTA_SUFFIX: &str = ".delta";
const SNAPSHOT_SUFFIX: &str = ".snapshot";
const TEMP_PREFIX: &str = "temp-";

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Names and locates the files of one store shard.
///
/// All files live under `<root>/<operatorId>/<partitionId>/`. Committed
/// files are `<version>.delta` and `<version>.snapshot`; staging files are
/// `temp-<nonce>` and are never opened by readers.
#[derive(Debug, Clone)]
pub struct FileLayout {
    dir: PathBuf,
}

impl FileLayout {
    pub fn new(root: impl AsRef<Path>, id: StoreId) -> Self {
        let dir = root
            .as_ref()
            .join(id.operator_id.to_string())
            .join(id.partition_id.to_string());
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the store directory, failing when a non-directory occupies
    /// the path.
    pub fn ensure_dir(&self) -> StoreResult<()> {
        if self.dir.exists() && !self.dir.is_dir() {
            return Err(StateStoreError::NotADirectory {
                path: self.dir.clone(),
            });
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn delta_path(&self, version: Version) -> PathBuf {
        self.dir.join(format!("{version}{DELTA_SUFFIX}"))
    }

    pub fn snapshot_path(&self, version: Version) -> PathBuf {
        self.dir.join(format!("{version}{SNAPSHOT_SUFFIX}"))
    }

    /// A fresh staging path, disjoint from the one of every other live
    /// session in this process.
    pub fn temp_path(&self) -> PathBuf {
        let nonce = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{TEMP_PREFIX}{}-{nonce:08x}", std::process::id()))
    }

    /// Parses a directory entry name into (version, kind). Temp files and
    /// alien names yield `None`.
    pub fn parse_file_name(name: &str) -> Option<(Version, FileKind)> {
        let (digits, kind) = if let Some(digits) = name.strip_suffix(DELTA_SUFFIX) {
            (digits, FileKind::Delta)
        } else if let Some(digits) = name.strip_suffix(SNAPSHOT_SUFFIX) {
            (digits, FileKind::Snapshot)
        } else {
            return None;
        };
        if digits.is_empty() || digits.chars().any(|c| !c.is_ascii_digit()) {
            return None;
        }
        let version = digits.parse::<Version>().ok()?;
        Some((version, kind))
    }

    /// Lists the store files sorted by ascending version, one entry per
    /// version. When both a delta and a snapshot exist for the same
    /// version the snapshot wins: it carries the complete state and makes
    /// the delta redundant.
    pub fn enumerate(&self) -> StoreResult<Vec<StoreFile>> {
        let mut by_version: BTreeMap<Version, StoreFile> = BTreeMap::new();
        for file in self.list_all()? {
            match by_version.get(&file.version) {
                Some(existing) if existing.kind == FileKind::Snapshot => {}
                _ => {
                    by_version.insert(file.version, file);
                }
            }
        }
        Ok(by_version.into_values().collect())
    }

    /// Every parsed file, ascending by version, without snapshot-wins
    /// dedup. Retention needs the redundant deltas too.
    pub(crate) fn list_all(&self) -> StoreResult<Vec<StoreFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            match Self::parse_file_name(&name) {
                Some((version, kind)) => files.push(StoreFile {
                    version,
                    path: entry.path(),
                    kind,
                }),
                None => {
                    tracing::warn!(file = %name, dir = ?self.dir, "Ignoring unrecognized file in store directory");
                }
            }
        }

        files.sort_by_key(|file| (file.version, file.kind == FileKind::Snapshot));
        Ok(files)
    }

    /// Greatest version present on disk, if any.
    pub fn latest_version(&self) -> StoreResult<Option<Version>> {
        Ok(self.list_all()?.last().map(|file| file.version))
    }
}
