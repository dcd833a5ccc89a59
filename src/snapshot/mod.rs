//! Best-effort JSON snapshot persistence.
//!
//! A single file maps every key whose current value is an object with
//! `"persist": true` to that value. Saves are atomic (temp file + rename)
//! and run on a fixed interval plus once on graceful shutdown. Loading
//! replays each persisted key through `patch`, so subscribers and indices
//! observe the restored state like any other write.
//!
//! This is not a WAL: writes between two snapshot ticks are lost on crash.


use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Map;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::store::Store;
use crate::Result;
use crate::SnapshotError;

/// Whether a value opts into persistence.
fn is_persistable(value: &Value) -> bool {
    value.get("persist") == Some(&Value::Bool(true))
}

/// Replays a snapshot file into the store. A missing file is an empty
/// snapshot, not an error. Returns the number of keys restored.
pub async fn load(
    store: &Store,
    path: &Path,
) -> Result<usize> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot file, starting empty");
            return Ok(0);
        }
        Err(e) => return Err(SnapshotError::Io(e).into()),
    };

    let root: Value = serde_json::from_slice(&contents).map_err(SnapshotError::Parse)?;
    let Value::Object(entries) = root else {
        return Err(SnapshotError::InvalidRoot {
            path: path.display().to_string(),
        }
        .into());
    };

    let count = entries.len();
    for (key, value) in entries {
        store.patch(&key, value);
    }
    info!(path = %path.display(), keys = count, "Snapshot loaded");
    Ok(count)
}

/// Writes the persistable subset of the store to `path` atomically.
/// Returns the number of keys written.
pub async fn save(
    store: &Store,
    path: &Path,
) -> Result<usize> {
    let mut persisted = Map::new();
    for (key, value) in store.dump() {
        if is_persistable(&value) {
            persisted.insert(key, value);
        }
    }
    let count = persisted.len();
    let contents =
        serde_json::to_string_pretty(&Value::Object(persisted)).map_err(SnapshotError::Parse)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(SnapshotError::Io)?;
        }
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await.map_err(SnapshotError::Io)?;
    tokio::fs::rename(&tmp, path).await.map_err(SnapshotError::Io)?;

    debug!(path = %path.display(), keys = count, "Snapshot saved");
    Ok(count)
}

/// Saves on a fixed interval until shutdown fires, then saves one final
/// time. Save failures are logged and do not stop the task.
pub async fn run_periodic(
    store: Store,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup is not a save.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = save(&store, &path).await {
                    error!(error = %e, "Periodic snapshot save failed");
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    info!("Saving final snapshot before shutdown");
    if let Err(e) = save(&store, &path).await {
        error!(error = %e, "Final snapshot save failed");
    }
}
