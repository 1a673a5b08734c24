//! Reconciles the file store with the directory's actual contents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use skonrad_core::{detect_file_type, FileRecord, FileStore, FileType, NewFile, VideoProber};

/// Adds and removes file rows so the store mirrors the top-level files of the
/// watched directory. Files of type `other` are never indexed.
pub struct FileIndexer<'a> {
    root_dir: &'a Path,
    store: &'a FileStore,
    prober: &'a dyn VideoProber,
}

impl<'a> FileIndexer<'a> {
    pub fn new(root_dir: &'a Path, store: &'a FileStore, prober: &'a dyn VideoProber) -> Self {
        Self {
            root_dir,
            store,
            prober,
        }
    }

    /// Reconcile rows with the directory. Returns the number of rows that
    /// existed before reconciliation.
    pub async fn ensure_directory_initialized(&self) -> Result<usize> {
        let stored_files = self.store.load_all_files()?;
        let actual_names: HashSet<String> = self
            .load_directory_files()?
            .into_iter()
            .map(|path| path.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect();

        let mut deleted = 0;
        for file in &stored_files {
            if !actual_names.contains(&file.name) {
                self.store.delete_file(file.id)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!("removed {deleted} rows for files no longer on disk");
        }

        let stored_names: HashSet<&str> = stored_files.iter().map(|f| f.name.as_str()).collect();
        let mut created = 0;
        for name in &actual_names {
            if stored_names.contains(name.as_str()) {
                continue;
            }
            let path = self.root_dir.join(name);
            match self.build_file_metadata(&path).await {
                Ok(Some(file)) => {
                    self.store.add_file(&file)?;
                    created += 1;
                }
                Ok(None) => {}
                Err(err) => tracing::error!("failed to index {}: {err:#}", path.display()),
            }
        }
        if created > 0 {
            tracing::info!(
                "indexed {created} new files; store had {} rows; directory has {} files",
                stored_files.len(),
                actual_names.len()
            );
        } else {
            tracing::info!("no new files, store ready");
        }
        Ok(stored_files.len())
    }

    /// Index a single new file. Returns the stored row, or `None` when the
    /// file is not indexable.
    pub async fn add_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let Some(file) = self.build_file_metadata(path).await? else {
            return Ok(None);
        };
        let id = self.store.add_file(&file)?;
        self.store.get_file_by_id(id)
    }

    /// Remove the row of a deleted file, returning it for cleanup.
    pub fn delete_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let name = path
            .file_name()
            .context("deleted path has no file name")?
            .to_string_lossy();
        let Some(file) = self.store.get_file_by_name(&name)? else {
            return Ok(None);
        };
        self.store.delete_file(file.id)?;
        Ok(Some(file))
    }

    async fn build_file_metadata(&self, path: &Path) -> Result<Option<NewFile>> {
        let file_type = detect_file_type(path, self.prober).await;
        if file_type == FileType::Other {
            return Ok(None);
        }
        let name = path
            .file_name()
            .context("indexed path has no file name")?
            .to_string_lossy()
            .into_owned();
        let added_at = std::fs::metadata(path)
            .ok()
            .and_then(|meta| meta.created().ok())
            .and_then(|created| created.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64);
        Ok(Some(NewFile {
            name,
            file_type,
            added_at,
            ..Default::default()
        }))
    }

    fn load_directory_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.root_dir)
            .with_context(|| format!("failed to list {}", self.root_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skonrad_core::testing::{encode_png, StubVideoProber, MP3_HEADER, MP4_HEADER};
    use tempfile::TempDir;

    fn prober() -> StubVideoProber {
        StubVideoProber::default()
    }

    #[tokio::test]
    async fn test_reconcile_adds_and_removes_rows() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(1, 2, 3)).unwrap();
        std::fs::write(dir.path().join("song.mp3"), MP3_HEADER).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not indexable").unwrap();

        let store = FileStore::in_memory().unwrap();
        store
            .add_file(&NewFile {
                name: "vanished.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            })
            .unwrap();

        let prober = prober();
        let indexer = FileIndexer::new(dir.path(), &store, &prober);
        let previously_stored = indexer.ensure_directory_initialized().await.unwrap();
        assert_eq!(previously_stored, 1);

        let mut names: Vec<String> = store
            .load_all_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["cat.png".to_string(), "song.mp3".to_string()]);

        let cat = store.get_file_by_name("cat.png").unwrap().unwrap();
        assert_eq!(cat.file_type, FileType::Image);
        let song = store.get_file_by_name("song.mp3").unwrap().unwrap();
        assert_eq!(song.file_type, FileType::Audio);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(1, 2, 3)).unwrap();
        let store = FileStore::in_memory().unwrap();

        let prober = prober();
        let indexer = FileIndexer::new(dir.path(), &store, &prober);
        indexer.ensure_directory_initialized().await.unwrap();
        indexer.ensure_directory_initialized().await.unwrap();

        assert_eq!(store.file_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_file_skips_unindexable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();

        let store = FileStore::in_memory().unwrap();
        let prober = prober();
        let indexer = FileIndexer::new(dir.path(), &store, &prober);
        assert!(indexer.add_file(&path).await.unwrap().is_none());
        assert_eq!(store.file_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mp4_without_stream_indexes_as_audio() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice.mp4");
        std::fs::write(&path, MP4_HEADER).unwrap();

        let store = FileStore::in_memory().unwrap();
        let prober = StubVideoProber {
            has_stream: false,
            ..Default::default()
        };
        let indexer = FileIndexer::new(dir.path(), &store, &prober);
        let file = indexer.add_file(&path).await.unwrap().unwrap();
        assert_eq!(file.file_type, FileType::Audio);
    }

    #[tokio::test]
    async fn test_delete_file_returns_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, encode_png(1, 2, 3)).unwrap();

        let store = FileStore::in_memory().unwrap();
        let prober = prober();
        let indexer = FileIndexer::new(dir.path(), &store, &prober);
        let created = indexer.add_file(&path).await.unwrap().unwrap();

        let deleted = indexer.delete_file(&path).unwrap().unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(indexer.delete_file(&path).unwrap().is_none());
    }
}
