use super::artifact::{ArtifactSummary, GifArtifact};
use super::error::StorageError;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// 扩展的持久化存储（后台上下文持有）
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Same id overwrites.
    async fn put(&self, artifact: &GifArtifact) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<GifArtifact, StorageError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<ArtifactSummary>, StorageError>;

    /// Returns whether something was removed.
    async fn remove(&self, id: &str) -> Result<bool, StorageError>;
}

fn sort_newest_first(summaries: &mut [ArtifactSummary]) {
    summaries.sort_by(|a, b| {
        b.metadata
            .created_at
            .cmp(&a.metadata.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, GifArtifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GifArtifact>> {
        self.artifacts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, artifact: &GifArtifact) -> Result<(), StorageError> {
        self.lock().insert(artifact.id().to_string(), artifact.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<GifArtifact, StorageError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ArtifactSummary>, StorageError> {
        let mut summaries: Vec<ArtifactSummary> = self.lock().values().map(GifArtifact::summary).collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().remove(id).is_some())
    }
}

/// 目录存储：`<id>.gif` 存二进制，`<id>.json` 存元数据
///
/// The JSON sidecar is written last and acts as the commit marker; a `.gif`
/// without it is ignored.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn validate_id(id: &str) -> Result<(), StorageError> {
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidId(id.to_string()))
        }
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.gif", id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_summary(path: &Path) -> Result<ArtifactSummary, StorageError> {
        let json = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn not_found_or(id: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(id.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, artifact: &GifArtifact) -> Result<(), StorageError> {
        Self::validate_id(artifact.id())?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let summary = serde_json::to_vec_pretty(&artifact.summary())?;
        Self::write_atomic(&self.blob_path(artifact.id()), artifact.blob()).await?;
        Self::write_atomic(&self.meta_path(artifact.id()), &summary).await?;

        debug!("💾 Stored {} in {}", artifact.id(), self.dir.display());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<GifArtifact, StorageError> {
        Self::validate_id(id)?;
        let summary = Self::read_summary(&self.meta_path(id))
            .await
            .map_err(|e| match e {
                StorageError::Io(io) => not_found_or(id, io),
                other => other,
            })?;
        let blob = tokio::fs::read(self.blob_path(id))
            .await
            .map_err(|e| not_found_or(id, e))?;
        Ok(GifArtifact::from_parts(summary.id, blob, summary.metadata))
    }

    async fn list(&self) -> Result<Vec<ArtifactSummary>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_summary(&path).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => debug!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        Self::validate_id(id)?;
        let mut existed = false;
        // 先删元数据，避免留下可见但缺二进制的记录
        for path in [self.meta_path(id), self.blob_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }
}
