//! Atomic, verified JSON writes shared by the Result Persister (C6) and the
//! Research Session (C8): a reader must either see no file or a fully
//! written, parseable file, never a partial one.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{CoreError, CoreResult};

/// Write `value` as pretty-printed JSON to `path`, atomically.
///
/// Writes to a sibling temp file, fsyncs it, then renames over the target
/// (rename is atomic on the same filesystem). Creates parent directories as
/// needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::Io(e.to_string()))?;
    }

    let tmp_path = tmp_path_for(path);
    let json = serde_json::to_string_pretty(value).map_err(|e| CoreError::Io(e.to_string()))?;

    {
        use std::io::Write;
        let mut file =
            std::fs::File::create(&tmp_path).map_err(|e| CoreError::Io(e.to_string()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| CoreError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| CoreError::Io(e.to_string()))?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| CoreError::Io(e.to_string()))?;
    Ok(())
}

/// Re-open and parse `path` as JSON, verifying it is durable and well-formed.
pub fn verify_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> CoreResult<T> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::Io(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CoreError::Io(e.to_string()))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp_name = format!(".{file_name}.tmp.{}", uuid::Uuid::new_v4());
    path.with_file_name(tmp_name)
}
