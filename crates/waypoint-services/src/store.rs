//! Durable chunk store.
//!
//! Chunks live in one flat directory, one file per chunk:
//!   {root}/{chunk_id_hex}.chunk
//!
//! Writes go to `{chunk_id_hex}.chunk.{random}.tmp` first, are synced, and
//! are then published under the final name with a no-clobber link. A
//! final-name file is therefore always complete, and the first committed
//! payload for a chunk id is never replaced. A crash mid-write can leave a
//! stray `.tmp` file behind and nothing else.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use waypoint_core::ChunkId;

const CHUNK_SUFFIX: &str = "chunk";
const TEMP_SUFFIX: &str = "tmp";

/// Result of a successful `store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The bytes are now stored under the chunk's final name.
    Committed,
    /// The chunk was already present; the existing file was left untouched.
    Duplicate,
}

/// Flat-directory chunk store. Cheap to clone; all clones share the root.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open the store, creating the root directory if it does not exist.
    ///
    /// This is the one-time startup check. Failure here is fatal to the node.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            bail!("chunk storage root is not configured");
        }
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage root: {}", root.display()))?;
        tracing::info!(root = %root.display(), "chunk storage ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for a chunk. Depends on the id alone.
    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.root.join(format!("{}.{CHUNK_SUFFIX}", id.to_hex()))
    }

    /// A fresh, never-reused temp path next to the final one.
    fn temp_path(&self, id: &ChunkId) -> PathBuf {
        self.root.join(format!(
            "{}.{CHUNK_SUFFIX}.{}.{TEMP_SUFFIX}",
            id.to_hex(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.chunk_path(id).exists()
    }

    /// Persist `data` under `id`.
    ///
    /// Idempotent: storing an id that is already present returns
    /// `Duplicate` without rewriting it. On failure the temp file is
    /// removed (best effort) and the original error is returned.
    ///
    /// Not cancellable. Once started, a write runs to completion so that
    /// shutdown never tears a chunk mid-write.
    pub async fn store(&self, id: ChunkId, data: &[u8]) -> Result<StoreOutcome> {
        let path = self.chunk_path(&id);
        let tmp_path = self.temp_path(&id);

        match self.write_and_publish(&id, &path, &tmp_path, data).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    chunk_id = %id,
                    path = %path.display(),
                    error = %e,
                    "failed to store chunk"
                );
                discard_temp(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn write_and_publish(
        &self,
        id: &ChunkId,
        path: &Path,
        tmp_path: &Path,
        data: &[u8],
    ) -> Result<StoreOutcome> {
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(tmp_path)
                .await
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data)
                .await
                .context("failed to write chunk data")?;
            file.sync_all().await.context("failed to sync chunk to disk")?;
        }

        if fs::try_exists(path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?
        {
            tracing::warn!(
                chunk_id = %id,
                path = %path.display(),
                "chunk already stored, skipping"
            );
            discard_temp(tmp_path).await;
            return Ok(StoreOutcome::Duplicate);
        }

        // Link instead of rename: fails rather than clobbers if a concurrent
        // store for the same id published first.
        let linked = fs::hard_link(tmp_path, path).await;
        let outcome = settle_publish(id, path, tmp_path, linked).await?;

        if outcome == StoreOutcome::Committed {
            tracing::info!(
                chunk_id = %id,
                bytes = data.len(),
                path = %path.display(),
                "chunk stored"
            );
        }
        Ok(outcome)
    }

    /// Count committed chunks (temp files excluded).
    pub fn count(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|entry| is_chunk_file(&entry.path()))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn is_chunk_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(CHUNK_SUFFIX)
}

/// Finish a publish given the result of the link attempt.
///
/// Only `AlreadyExists` is a duplicate. Any other link error means the
/// filesystem cannot link (EPERM on vfat/exfat and many FUSE mounts,
/// ENOTSUP elsewhere), and the chunk is published by rename after a
/// second existence check.
async fn settle_publish(
    id: &ChunkId,
    path: &Path,
    tmp_path: &Path,
    linked: io::Result<()>,
) -> Result<StoreOutcome> {
    match linked {
        Ok(()) => {
            discard_temp(tmp_path).await;
            Ok(StoreOutcome::Committed)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::warn!(
                chunk_id = %id,
                path = %path.display(),
                "chunk stored concurrently, skipping"
            );
            discard_temp(tmp_path).await;
            Ok(StoreOutcome::Duplicate)
        }
        Err(e) => {
            tracing::debug!(
                chunk_id = %id,
                error = %e,
                "hard link unavailable, publishing by rename"
            );
            if fs::try_exists(path)
                .await
                .with_context(|| format!("failed to stat {}", path.display()))?
            {
                discard_temp(tmp_path).await;
                return Ok(StoreOutcome::Duplicate);
            }
            fs::rename(tmp_path, path).await.with_context(|| {
                format!("failed to rename {} to {}", tmp_path.display(), path.display())
            })?;
            Ok(StoreOutcome::Committed)
        }
    }
}

/// Remove a temp file. Failures are logged, never returned.
async fn discard_temp(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file")
        }
    }
}
