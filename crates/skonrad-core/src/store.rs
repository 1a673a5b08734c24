//! SQLite storage for file metadata and the directory registry.
//!
//! Every registered directory keeps its own `skonrad.db` with a `files` table;
//! the process-wide registry database holds the `directories` table. The
//! database file and its `-journal` sibling must be ignored by the watcher.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Name of the per-directory (and registry) database file.
pub const DB_FILE_NAME: &str = "skonrad.db";

const FILES_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    added_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    ftype TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_screenshot INTEGER NOT NULL DEFAULT 0,
    ocr_text TEXT,
    is_ocr_analyzed INTEGER NOT NULL DEFAULT 0,
    transcript TEXT,
    is_transcript_analyzed INTEGER NOT NULL DEFAULT 0,
    is_transcript_fixed INTEGER NOT NULL DEFAULT 0,
    lemmatized_description TEXT,
    lemmatized_ocr_text TEXT,
    lemmatized_transcript TEXT,
    has_video_embedding_failed INTEGER NOT NULL DEFAULT 0,
    llm_description TEXT,
    is_llm_description_analyzed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
";

const DIRECTORIES_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS directories (
    name TEXT PRIMARY KEY,
    fs_path TEXT NOT NULL,
    comma_separated_languages TEXT NOT NULL,
    primary_language TEXT NOT NULL
);
";

/// Kind of an indexed file; `Other` files are never indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Audio => "audio",
            FileType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> FileType {
        match value {
            "image" => FileType::Image,
            "video" => FileType::Video,
            "audio" => FileType::Audio,
            _ => FileType::Other,
        }
    }
}

/// One row of the `files` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub added_at: i64,
    pub file_type: FileType,
    pub description: String,
    pub is_screenshot: bool,
    pub ocr_text: Option<String>,
    pub is_ocr_analyzed: bool,
    pub transcript: Option<String>,
    pub is_transcript_analyzed: bool,
    pub is_transcript_fixed: bool,
    pub lemmatized_description: Option<String>,
    pub lemmatized_ocr_text: Option<String>,
    pub lemmatized_transcript: Option<String>,
    pub has_video_embedding_failed: bool,
    pub llm_description: Option<String>,
    pub is_llm_description_analyzed: bool,
}

/// Insertable file row; unspecified fields take their column defaults.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub file_type: FileType,
    pub added_at: Option<i64>,
    pub description: String,
    pub is_screenshot: bool,
    pub ocr_text: Option<String>,
    pub is_ocr_analyzed: bool,
    pub transcript: Option<String>,
    pub is_transcript_analyzed: bool,
}

impl Default for NewFile {
    fn default() -> Self {
        Self {
            name: String::new(),
            file_type: FileType::Other,
            added_at: None,
            description: String::new(),
            is_screenshot: false,
            ocr_text: None,
            is_ocr_analyzed: false,
            transcript: None,
            is_transcript_analyzed: false,
        }
    }
}

/// Per-directory metadata store.
pub struct FileStore {
    conn: Mutex<Connection>,
}

impl FileStore {
    /// Open or create the store at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(FILES_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open the store of a registered directory (`<root>/skonrad.db`).
    pub fn open_in_directory(root_dir: &Path) -> Result<Self> {
        Self::new(&root_dir.join(DB_FILE_NAME))
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(FILES_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add_file(&self, file: &NewFile) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO files (name, added_at, ftype, description, is_screenshot,
                                ocr_text, is_ocr_analyzed, transcript, is_transcript_analyzed)
             VALUES (?1, COALESCE(?2, strftime('%s', 'now')), ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.name,
                file.added_at,
                file.file_type.as_str(),
                file.description,
                file.is_screenshot,
                file.ocr_text,
                file.is_ocr_analyzed,
                file.transcript,
                file.is_transcript_analyzed,
            ],
        )
        .with_context(|| format!("failed to insert file row for {}", file.name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_all(&self, files: &[NewFile]) -> Result<()> {
        for file in files {
            self.add_file(file)?;
        }
        Ok(())
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_FILE} WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_file).optional()?)
    }

    pub fn get_file_by_name(&self, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_FILE} WHERE name = ?1"))?;
        Ok(stmt.query_row(params![name], row_to_file).optional()?)
    }

    /// All rows, newest first.
    pub fn load_all_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{SELECT_FILE} ORDER BY added_at DESC, id DESC"))?;
        let rows = stmt.query_map([], row_to_file)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn file_count(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// The subset of `ids` that exists, keyed by id.
    pub fn get_files_by_ids(&self, ids: &HashSet<i64>) -> Result<HashMap<i64, FileRecord>> {
        // Bounded result sets; a per-id point query keeps the SQL simple.
        let mut files = HashMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(file) = self.get_file_by_id(id)? {
                files.insert(id, file);
            }
        }
        Ok(files)
    }

    /// Persist every mutable column of `file`.
    pub fn update_file(&self, file: &FileRecord) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE files SET
                name = ?2, ftype = ?3, description = ?4, is_screenshot = ?5,
                ocr_text = ?6, is_ocr_analyzed = ?7,
                transcript = ?8, is_transcript_analyzed = ?9, is_transcript_fixed = ?10,
                lemmatized_description = ?11, lemmatized_ocr_text = ?12,
                lemmatized_transcript = ?13, has_video_embedding_failed = ?14,
                llm_description = ?15, is_llm_description_analyzed = ?16
             WHERE id = ?1",
            params![
                file.id,
                file.name,
                file.file_type.as_str(),
                file.description,
                file.is_screenshot,
                file.ocr_text,
                file.is_ocr_analyzed,
                file.transcript,
                file.is_transcript_analyzed,
                file.is_transcript_fixed,
                file.lemmatized_description,
                file.lemmatized_ocr_text,
                file.lemmatized_transcript,
                file.has_video_embedding_failed,
                file.llm_description,
                file.is_llm_description_analyzed,
            ],
        )?;
        anyhow::ensure!(updated == 1, "no file row with id {}", file.id);
        Ok(())
    }

    pub fn delete_file(&self, id: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Image rows whose OCR has not run yet.
    pub fn images_without_ocr(&self) -> Result<Vec<FileRecord>> {
        self.query_files(&format!(
            "{SELECT_FILE} WHERE ftype = 'image' AND is_ocr_analyzed = 0 ORDER BY id"
        ))
    }

    /// Audio/video rows with no transcription attempt yet.
    pub fn media_without_transcript(&self) -> Result<Vec<FileRecord>> {
        self.query_files(&format!(
            "{SELECT_FILE} WHERE ftype IN ('audio', 'video') AND is_transcript_analyzed = 0 ORDER BY id"
        ))
    }

    /// Audio/video rows whose transcript was never manually corrected.
    pub fn media_with_auto_transcript(&self) -> Result<Vec<FileRecord>> {
        self.query_files(&format!(
            "{SELECT_FILE} WHERE ftype IN ('audio', 'video') AND is_transcript_fixed = 0 ORDER BY id"
        ))
    }

    /// Image rows without a vision-LM description attempt.
    pub fn images_without_llm_description(&self) -> Result<Vec<FileRecord>> {
        self.query_files(&format!(
            "{SELECT_FILE} WHERE ftype = 'image' AND is_llm_description_analyzed = 0 ORDER BY id"
        ))
    }

    fn query_files(&self, sql: &str) -> Result<Vec<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_file)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const SELECT_FILE: &str = "SELECT id, name, added_at, ftype, description, is_screenshot,
    ocr_text, is_ocr_analyzed, transcript, is_transcript_analyzed, is_transcript_fixed,
    lemmatized_description, lemmatized_ocr_text, lemmatized_transcript,
    has_video_embedding_failed, llm_description, is_llm_description_analyzed
    FROM files";

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        added_at: row.get(2)?,
        file_type: FileType::parse(&row.get::<_, String>(3)?),
        description: row.get(4)?,
        is_screenshot: row.get(5)?,
        ocr_text: row.get(6)?,
        is_ocr_analyzed: row.get(7)?,
        transcript: row.get(8)?,
        is_transcript_analyzed: row.get(9)?,
        is_transcript_fixed: row.get(10)?,
        lemmatized_description: row.get(11)?,
        lemmatized_ocr_text: row.get(12)?,
        lemmatized_transcript: row.get(13)?,
        has_video_embedding_failed: row.get(14)?,
        llm_description: row.get(15)?,
        is_llm_description_analyzed: row.get(16)?,
    })
}

/// One registered directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub name: String,
    pub fs_path: PathBuf,
    pub languages: Vec<String>,
    pub primary_language: String,
}

/// Process-wide table of registered directories.
pub struct DirectoryRegistry {
    conn: Mutex<Connection>,
}

impl DirectoryRegistry {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open registry database: {}", path.display()))?;
        conn.execute_batch(DIRECTORIES_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DIRECTORIES_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add(&self, directory: &DirectoryRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO directories (name, fs_path, comma_separated_languages, primary_language)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                directory.name,
                directory.fs_path.to_string_lossy(),
                directory.languages.join(","),
                directory.primary_language,
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM directories WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<DirectoryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, fs_path, comma_separated_languages, primary_language
             FROM directories WHERE name = ?1",
        )?;
        Ok(stmt.query_row(params![name], row_to_directory).optional()?)
    }

    pub fn get_all(&self) -> Result<Vec<DirectoryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, fs_path, comma_separated_languages, primary_language
             FROM directories ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_directory)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn row_to_directory(row: &Row<'_>) -> rusqlite::Result<DirectoryRecord> {
    let languages: String = row.get(2)?;
    Ok(DirectoryRecord {
        name: row.get(0)?,
        fs_path: PathBuf::from(row.get::<_, String>(1)?),
        languages: languages
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        primary_language: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_file() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "cat.png".into(),
                file_type: FileType::Image,
                description: "a cat on a sofa".into(),
                ..Default::default()
            })
            .unwrap();

        let by_id = store.get_file_by_id(id).unwrap().unwrap();
        assert_eq!(by_id.name, "cat.png");
        assert_eq!(by_id.file_type, FileType::Image);
        assert!(!by_id.is_screenshot);
        assert!(by_id.lemmatized_description.is_none());

        let by_name = store.get_file_by_name("cat.png").unwrap().unwrap();
        assert_eq!(by_name, by_id);
        assert!(store.get_file_by_name("dog.png").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let store = FileStore::in_memory().unwrap();
        let file = NewFile {
            name: "cat.png".into(),
            file_type: FileType::Image,
            ..Default::default()
        };
        store.add_file(&file).unwrap();
        assert!(store.add_file(&file).is_err());
    }

    #[test]
    fn test_load_all_newest_first() {
        let store = FileStore::in_memory().unwrap();
        store
            .add_file(&NewFile {
                name: "old.png".into(),
                file_type: FileType::Image,
                added_at: Some(100),
                ..Default::default()
            })
            .unwrap();
        store
            .add_file(&NewFile {
                name: "new.png".into(),
                file_type: FileType::Image,
                added_at: Some(200),
                ..Default::default()
            })
            .unwrap();

        let names: Vec<String> = store
            .load_all_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["new.png".to_string(), "old.png".to_string()]);
    }

    #[test]
    fn test_update_round_trip() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "clip.mp4".into(),
                file_type: FileType::Video,
                ..Default::default()
            })
            .unwrap();

        let mut file = store.get_file_by_id(id).unwrap().unwrap();
        file.transcript = Some("happy birthday".into());
        file.is_transcript_analyzed = true;
        file.lemmatized_transcript = Some("happy birthday".into());
        file.has_video_embedding_failed = true;
        store.update_file(&file).unwrap();

        assert_eq!(store.get_file_by_id(id).unwrap().unwrap(), file);
    }

    #[test]
    fn test_update_missing_file_fails() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "cat.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            })
            .unwrap();
        let mut file = store.get_file_by_id(id).unwrap().unwrap();
        file.id = 999;
        assert!(store.update_file(&file).is_err());
    }

    #[test]
    fn test_analysis_queries() {
        let store = FileStore::in_memory().unwrap();
        store
            .add_file(&NewFile {
                name: "raw.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            })
            .unwrap();
        store
            .add_file(&NewFile {
                name: "done.png".into(),
                file_type: FileType::Image,
                is_ocr_analyzed: true,
                ..Default::default()
            })
            .unwrap();
        store
            .add_file(&NewFile {
                name: "talk.mp3".into(),
                file_type: FileType::Audio,
                ..Default::default()
            })
            .unwrap();

        let ocr_pending = store.images_without_ocr().unwrap();
        assert_eq!(ocr_pending.len(), 1);
        assert_eq!(ocr_pending[0].name, "raw.png");

        let transcript_pending = store.media_without_transcript().unwrap();
        assert_eq!(transcript_pending.len(), 1);
        assert_eq!(transcript_pending[0].name, "talk.mp3");

        assert_eq!(store.images_without_llm_description().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_file() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "cat.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            })
            .unwrap();
        store.delete_file(id).unwrap();
        assert!(store.get_file_by_id(id).unwrap().is_none());
        assert_eq!(store.file_count().unwrap(), 0);
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = DirectoryRegistry::in_memory().unwrap();
        let record = DirectoryRecord {
            name: "photos".into(),
            fs_path: PathBuf::from("/home/user/photos"),
            languages: vec!["pl".into(), "en".into()],
            primary_language: "pl".into(),
        };
        registry.add(&record).unwrap();

        assert_eq!(registry.get("photos").unwrap().unwrap(), record);
        assert_eq!(registry.get_all().unwrap(), vec![record]);

        registry.remove("photos").unwrap();
        assert!(registry.get("photos").unwrap().is_none());
        assert!(registry.get_all().unwrap().is_empty());
    }
}
