//! Persistence layer: file naming and enumeration, framed record codec,
//! shared filesystem helpers.

pub mod codec;
pub mod layout;

pub use codec::{RecordReader, UpdateReader};
pub use layout::FileLayout;

use std::path::Path;

use crate::error::StoreResult;

/// Sync directory entries to disk to guarantee metadata durability after a
/// rename or delete.
pub(crate) fn sync_directory(path: &Path) -> StoreResult<()> {
    // Opening directories is platform-dependent. `std::fs::File::open` works
    // on Linux and macOS as long as the path exists.
    let dir = std::fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}
