//! Storage for synthesized reply audio, served back to clients under [`AUDIO_ROUTE_PREFIX`].

use crate::error::CoreResult;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// URL prefix the gateway serves the audio directory under.
pub const AUDIO_ROUTE_PREFIX: &str = "/audio";

/// A persisted reply clip and its retrieval reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAudio {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    /// Open (and create if missing) the audio directory.
    pub fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one clip under a fresh `bot_<uuid>.mp3` name.
    pub async fn persist(&self, bytes: &[u8]) -> CoreResult<StoredAudio> {
        let file_name = format!("bot_{}.mp3", Uuid::new_v4());
        tokio::fs::write(self.dir.join(&file_name), bytes).await?;
        debug!("Stored {} bytes of reply audio as {}", bytes.len(), file_name);
        Ok(StoredAudio {
            url: format!("{}/{}", AUDIO_ROUTE_PREFIX, file_name),
            file_name,
        })
    }

    /// Delete stored clips at least `max_age` old. Returns the number removed.
    pub async fn sweep(&self, max_age: Duration) -> CoreResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_clip = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("bot_") && n.ends_with(".mp3"))
                .unwrap_or(false);
            if !is_clip {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_uses_unique_names_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path().join("temp")).unwrap();
        let a = store.persist(b"one").await.unwrap();
        let b = store.persist(b"two").await.unwrap();
        assert_ne!(a.file_name, b.file_name);
        assert!(a.url.starts_with("/audio/bot_"));
        assert!(a.url.ends_with(".mp3"));
        let written = std::fs::read(store.dir().join(&a.file_name)).unwrap();
        assert_eq!(written, b"one");
    }

    #[tokio::test]
    async fn test_sweep_only_touches_old_clips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path()).unwrap();
        store.persist(b"clip").await.unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        assert_eq!(store.sweep(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.sweep(Duration::ZERO).await.unwrap(), 1);
        assert!(dir.path().join("keep.txt").exists());
    }
}
