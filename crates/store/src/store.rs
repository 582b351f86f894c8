//! Filesystem blob store with sidecar-backup crash recovery.
//!
//! One record lives at `<root>/<bucket>/<ref[0:2]>/<ref>.json`. Replacing a
//! record first moves the current file to a `.backup` sidecar, then lands
//! the new content via a fsynced temp-file rename, then removes the
//! sidecar. A sidecar found on the read path means the previous write died
//! mid-transition; the last durable content is the sidecar, so the reader
//! restores it before reading.

use crate::error::{StoreError, StoreResult};
use corkboard_core::{BlobRecord, Key};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem blob store.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for a key.
    ///
    /// `Key` components are validated at construction, so joining them
    /// cannot escape the root.
    pub fn record_path(&self, key: &Key) -> PathBuf {
        self.root
            .join(key.bucket.as_str())
            .join(key.blob_ref.shard_prefix())
            .join(format!("{}.json", key.blob_ref))
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".backup");
        PathBuf::from(os)
    }

    /// Read the record for a key.
    ///
    /// Restores a crash sidecar first if one exists. Missing and
    /// unparseable files both read as `None`; only real I/O failures
    /// return an error.
    pub async fn read(&self, key: &Key) -> StoreResult<Option<BlobRecord>> {
        let path = self.record_path(key);
        let backup = Self::backup_path(&path);

        if fs::try_exists(&backup).await? {
            match fs::rename(&backup, &path).await {
                Ok(()) => {
                    tracing::warn!(key = %key, "restored blob from crash backup");
                }
                // A concurrent reader can have completed the restore between
                // the existence check and the rename.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unparseable blob record treated as absent");
                Ok(None)
            }
        }
    }

    /// Write the record for a key, replacing any existing one.
    ///
    /// Returns only after the previous content's sidecar has been removed,
    /// i.e. after the replacement is fully committed.
    pub async fn write(&self, key: &Key, record: &BlobRecord) -> StoreResult<()> {
        let path = self.record_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let backup = Self::backup_path(&path);
        let existed = fs::try_exists(&path).await?;
        if existed {
            fs::rename(&path, &backup).await?;
        }

        let bytes = serde_json::to_vec(record)?;
        let temp = path.with_file_name(format!(
            "{}.tmp.{}",
            key.blob_ref,
            Uuid::new_v4()
        ));
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp, &path).await?;

        if existed {
            match fs::remove_file(&backup).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }

        Ok(())
    }
}
