//! File-based Dead Letter Store
//!
//! Stores one JSON document per entry (`<id>.json`) under a directory, so
//! dead letters survive restarts and can be inspected with ordinary tools.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::domain::dead_letter::{DeadLetterEntry, DeadLetterFilter};
use crate::domain::foundation::{DeadLetterId, Timestamp};
use crate::ports::{DeadLetterError, DeadLetterStore};

const EXTENSION: &str = "json";

/// File-based storage for dead letters.
#[derive(Debug, Clone)]
pub struct FileDeadLetterStore {
    base_path: PathBuf,
}

impl FileDeadLetterStore {
    /// Create a store rooted at `base_path`. The directory is created on
    /// first write.
    ///
    /// # Example
    /// ```ignore
    /// let store = FileDeadLetterStore::new("./data/dead_letters");
    /// ```
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, id: DeadLetterId) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, EXTENSION))
    }

    async fn ensure_dir(&self) -> Result<(), DeadLetterError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))
    }

    async fn read_entry(&self, path: &Path) -> Result<DeadLetterEntry, DeadLetterError> {
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| DeadLetterError::Serialization(e.to_string()))
    }

    /// Reads every readable entry. Unreadable files are logged and skipped
    /// so one corrupt document does not hide the rest.
    async fn read_all(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeadLetterError::Io(e.to_string())),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            match self.read_entry(&path).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable dead letter");
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl DeadLetterStore for FileDeadLetterStore {
    async fn put(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.ensure_dir().await?;

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| DeadLetterError::Serialization(e.to_string()))?;

        // Write then rename so readers never see a partial document.
        let path = self.entry_path(entry.id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let path = self.entry_path(id);
        if !fs::try_exists(&path)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?
        {
            return Ok(None);
        }
        self.read_entry(&path).await.map(Some)
    }

    async fn list(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        Ok(filter.apply(self.read_all().await?))
    }

    async fn remove(&self, id: DeadLetterId) -> Result<bool, DeadLetterError> {
        match fs::remove_file(self.entry_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeadLetterError::Io(e.to_string())),
        }
    }

    async fn depth(&self) -> Result<usize, DeadLetterError> {
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(DeadLetterError::Io(e.to_string())),
        };
        let mut count = 0;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?
        {
            if item.path().extension().and_then(|ext| ext.to_str()) == Some(EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_older_than(&self, cutoff: Timestamp) -> Result<usize, DeadLetterError> {
        let mut purged = 0;
        for entry in self.read_all().await? {
            if entry.last_failed_at.is_before(&cutoff) && self.remove(entry.id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
