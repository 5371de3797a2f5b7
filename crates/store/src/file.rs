//! JSON-file checkpoint store.
//!
//! Every save writes the whole checkpoint to a hidden temporary file in the
//! same directory and renames it over `<run_id>.json`, so readers see either
//! the previous checkpoint or the new one, never a torn write. The file and
//! its directory are synced before `save` returns the new version.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use pipeline::{Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary, RunId, State, Timestamp};

const EXTENSION: &str = "json";

#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    // Serialises read-modify-write of version numbers within this process.
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Storage`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| storage(&root, "create directory", err))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, run_id: &RunId) -> Result<PathBuf, CheckpointError> {
        if !run_id.is_path_safe() {
            return Err(CheckpointError::Storage {
                message: format!("run id '{run_id}' cannot be used as a file name"),
            });
        }
        Ok(self.root.join(format!("{}.{EXTENSION}", run_id.as_str())))
    }

    async fn read(&self, run_id: &RunId) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(run_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    run_id: run_id.clone(),
                })
            }
            Err(err) => return Err(storage(&path, "read", err)),
        };
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    #[instrument(skip(self, state), fields(run_id = %run_id))]
    async fn save(&self, run_id: &RunId, state: &State) -> Result<u64, CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(run_id)?;

        let version = match self.read(run_id).await {
            Ok(previous) => previous.version + 1,
            Err(CheckpointError::NotFound { .. }) => 1,
            Err(err) => return Err(err),
        };
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            version,
            saved_at: Timestamp::now(),
            state: state.clone(),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;

        let tmp = self.root.join(format!(".{}.{EXTENSION}.tmp", run_id.as_str()));
        write_synced(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| storage(&path, "replace", err))?;
        sync_dir(&self.root).await?;

        debug!(version, bytes = json.len(), "Checkpoint saved");
        Ok(version)
    }

    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, CheckpointError> {
        self.read(run_id).await
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|err| storage(&self.root, "list", err))?;

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| storage(&self.root, "list", err))?
        {
            let path = entry.path();
            let is_checkpoint = path.extension().is_some_and(|ext| ext == EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_checkpoint {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| storage(&path, "read", err))
                .and_then(|text| Ok(serde_json::from_str::<Checkpoint>(&text)?));
            match parsed {
                Ok(checkpoint) => summaries.push(checkpoint.summary()),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable checkpoint"),
            }
        }
        summaries.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(summaries)
    }

    async fn delete(&self, run_id: &RunId) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage(&path, "delete", err)),
        }
    }
}

/// Writes `bytes` to `path` and flushes them to disk before returning.
async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|err| storage(path, "create", err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| storage(path, "write", err))?;
    file.sync_all()
        .await
        .map_err(|err| storage(path, "sync", err))
}

// Makes the rename itself durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), CheckpointError> {
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|err| storage(dir, "open", err))?;
    handle.sync_all().await.map_err(|err| storage(dir, "sync", err))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), CheckpointError> {
    Ok(())
}

fn storage(path: &Path, action: &str, err: std::io::Error) -> CheckpointError {
    CheckpointError::Storage {
        message: format!("failed to {action} '{}': {err}", path.display()),
    }
}
