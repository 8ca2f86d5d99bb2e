//! Atomic JSON snapshots on disk.
//!
//! ```text
//! weights.json       current snapshot
//! weights.json.tmp   written first, then renamed over the snapshot
//! ```
//!
//! A crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{Error, Result};

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Serialize `value` as pretty JSON and move it into place.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot written by [`write_json_atomic`].
///
/// Returns `Ok(None)` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    let value = serde_json::from_str(&json)
        .map_err(|e| Error::Json(format!("{}: {e}", path.display())))?;
    Ok(Some(value))
}
