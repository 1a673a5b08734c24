//! On-disk embedding records: `.embeddings/<file_name>.emb`.
//!
//! Record layout:
//! - one ASCII digit: number of key letters
//! - the key letters, in fixed order `D O T I C V`
//! - per letter, in key order:
//!   - text kinds (D/O/T): 32-byte SHA-256 of the source text, then a 1-D
//!     `.npy` f32 vector
//!   - image kinds (I/C): a 1-D `.npy` f32 vector
//!   - video kind (V): a 2-D `.npy` f32 matrix, one row per sampled frame
//!
//! Text vectors are content-addressed: on load the hash is recomputed from the
//! file's current text and a mismatch invalidates that vector only.

pub mod npy;

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use npy::NpyArray;

const EMBEDDING_DIR_NAME: &str = ".embeddings";
const EMBEDDING_FILE_EXTENSION: &str = "emb";
const HASH_LENGTH: usize = 32;

/// A text-derived vector together with the text it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEmbedding {
    pub text: String,
    pub vector: Vec<f32>,
}

/// All persisted vectors of one file; every component is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredEmbeddings {
    pub description: Option<TextEmbedding>,
    pub ocr_text: Option<TextEmbedding>,
    pub transcription_text: Option<TextEmbedding>,
    pub image: Option<Vec<f32>>,
    pub clip_image: Option<Vec<f32>>,
    pub clip_video: Option<Vec<Vec<f32>>>,
}

impl StoredEmbeddings {
    /// The record key: one letter per present component, fixed order.
    pub fn key(&self) -> String {
        let mut key = String::new();
        if self.description.is_some() {
            key.push('D');
        }
        if self.ocr_text.is_some() {
            key.push('O');
        }
        if self.transcription_text.is_some() {
            key.push('T');
        }
        if self.image.is_some() {
            key.push('I');
        }
        if self.clip_image.is_some() {
            key.push('C');
        }
        if self.clip_video.is_some() {
            key.push('V');
        }
        key
    }

    pub fn is_empty(&self) -> bool {
        self.key().is_empty()
    }
}

/// The current texts a record is checked against on load.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedTexts<'a> {
    pub description: &'a str,
    pub ocr_text: Option<&'a str>,
    pub transcript: Option<&'a str>,
}

/// Reads and writes per-file embedding records under `<root>/.embeddings/`.
pub struct EmbeddingPersistor {
    embedding_dir: PathBuf,
}

impl EmbeddingPersistor {
    pub fn new(root_dir: &Path) -> Result<Self> {
        let embedding_dir = root_dir.join(EMBEDDING_DIR_NAME);
        fs::create_dir_all(&embedding_dir)
            .with_context(|| format!("failed to create {}", embedding_dir.display()))?;
        Ok(Self { embedding_dir })
    }

    /// Persist `embeddings` for `file_name`. An empty record deletes the file.
    /// Writes go to a temp file first and are renamed into place.
    pub fn save(&self, file_name: &str, embeddings: &StoredEmbeddings) -> Result<()> {
        let path = self.record_path(file_name);
        let key = embeddings.key();
        if key.is_empty() {
            return self.delete(file_name);
        }

        let tmp_path = path.with_extension(format!("{EMBEDDING_FILE_EXTENSION}.tmp"));
        {
            let file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);
            write!(writer, "{}", key.len())?;
            writer.write_all(key.as_bytes())?;
            for letter in key.chars() {
                match letter {
                    'D' => Self::write_text_kind(&mut writer, embeddings.description.as_ref())?,
                    'O' => Self::write_text_kind(&mut writer, embeddings.ocr_text.as_ref())?,
                    'T' => {
                        Self::write_text_kind(&mut writer, embeddings.transcription_text.as_ref())?
                    }
                    'I' => {
                        let vector =
                            embeddings.image.as_deref().context("image kind listed in key but absent")?;
                        npy::write_vector(&mut writer, vector)?
                    }
                    'C' => {
                        let vector = embeddings
                            .clip_image
                            .as_deref()
                            .context("clip kind listed in key but absent")?;
                        npy::write_vector(&mut writer, vector)?
                    }
                    'V' => Self::write_video_kind(&mut writer, embeddings.clip_video.as_deref())?,
                    _ => bail!("unexpected embedding key letter {letter}"),
                }
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to move record into {}", path.display()))?;
        Ok(())
    }

    /// Load the record for `file_name`, dropping text vectors whose stored
    /// hash no longer matches the current text.
    pub fn load(&self, file_name: &str, expected: ExpectedTexts<'_>) -> StoredEmbeddings {
        self.load_inner(file_name, expected, true)
    }

    /// Load without the hash comparison. Used by edit paths that overwrite
    /// the text vector right after.
    pub fn load_without_consistency_check(
        &self,
        file_name: &str,
        expected: ExpectedTexts<'_>,
    ) -> StoredEmbeddings {
        self.load_inner(file_name, expected, false)
    }

    fn load_inner(
        &self,
        file_name: &str,
        expected: ExpectedTexts<'_>,
        check_consistency: bool,
    ) -> StoredEmbeddings {
        match self.try_load(file_name, expected, check_consistency) {
            Ok(embeddings) => embeddings,
            Err(err) => {
                tracing::debug!("dropping unreadable embedding record for {file_name}: {err:#}");
                StoredEmbeddings::default()
            }
        }
    }

    fn try_load(
        &self,
        file_name: &str,
        expected: ExpectedTexts<'_>,
        check_consistency: bool,
    ) -> Result<StoredEmbeddings> {
        let path = self.record_path(file_name);
        let file = fs::File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut key_len = [0u8; 1];
        reader.read_exact(&mut key_len)?;
        let key_len = (key_len[0] as char)
            .to_digit(10)
            .context("embedding record key length is not a digit")? as usize;
        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key)?;
        let key = String::from_utf8(key).context("embedding record key is not ascii")?;

        let mut result = StoredEmbeddings::default();
        for letter in key.chars() {
            match letter {
                'D' => {
                    result.description = Self::read_text_kind(
                        &mut reader,
                        expected.description,
                        check_consistency,
                    )?
                }
                'O' => {
                    result.ocr_text = Self::read_text_kind(
                        &mut reader,
                        expected.ocr_text.unwrap_or(""),
                        check_consistency,
                    )?
                }
                'T' => {
                    result.transcription_text = Self::read_text_kind(
                        &mut reader,
                        expected.transcript.unwrap_or(""),
                        check_consistency,
                    )?
                }
                'I' => result.image = Some(Self::read_vector(&mut reader)?),
                'C' => result.clip_image = Some(Self::read_vector(&mut reader)?),
                'V' => result.clip_video = Some(Self::read_matrix(&mut reader)?),
                _ => bail!("unexpected embedding key letter {letter}"),
            }
        }
        Ok(result)
    }

    /// Delete the record; missing records are fine.
    pub fn delete(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.record_path(file_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Names of all files that have an embedding record.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.embedding_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(&format!(".{EMBEDDING_FILE_EXTENSION}")) {
                names.push(stripped.to_string());
            }
        }
        Ok(names)
    }

    fn record_path(&self, file_name: &str) -> PathBuf {
        self.embedding_dir
            .join(format!("{file_name}.{EMBEDDING_FILE_EXTENSION}"))
    }

    fn write_text_kind<W: Write>(writer: &mut W, embedding: Option<&TextEmbedding>) -> Result<()> {
        let embedding = embedding.context("text kind listed in key but absent")?;
        writer.write_all(&hash_text(&embedding.text))?;
        npy::write_vector(writer, &embedding.vector)?;
        Ok(())
    }

    fn write_video_kind<W: Write>(writer: &mut W, rows: Option<&[Vec<f32>]>) -> Result<()> {
        let rows = rows.context("video kind listed in key but absent")?;
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        npy::write_matrix(writer, rows.len(), dim, &flat)?;
        Ok(())
    }

    fn read_text_kind<R: Read>(
        reader: &mut R,
        expected_text: &str,
        check_consistency: bool,
    ) -> Result<Option<TextEmbedding>> {
        let mut stored_hash = [0u8; HASH_LENGTH];
        reader.read_exact(&mut stored_hash)?;
        let vector = Self::read_vector(reader)?;
        if check_consistency && stored_hash != hash_text(expected_text) {
            return Ok(None);
        }
        Ok(Some(TextEmbedding {
            text: expected_text.to_string(),
            vector,
        }))
    }

    fn read_vector<R: Read>(reader: &mut R) -> Result<Vec<f32>> {
        match npy::read_array(reader)? {
            NpyArray::Vector(data) => Ok(data),
            NpyArray::Matrix { .. } => bail!("expected a vector, found a matrix"),
        }
    }

    fn read_matrix<R: Read>(reader: &mut R) -> Result<Vec<Vec<f32>>> {
        match npy::read_array(reader)? {
            NpyArray::Matrix { dim, data, .. } => {
                Ok(data.chunks(dim.max(1)).map(<[f32]>::to_vec).collect())
            }
            NpyArray::Vector(_) => bail!("expected a matrix, found a vector"),
        }
    }
}

/// SHA-256 of the text an embedding was computed from.
pub fn hash_text(text: &str) -> [u8; HASH_LENGTH] {
    let digest = Sha256::digest(text.as_bytes());
    let mut hash = [0u8; HASH_LENGTH];
    hash.copy_from_slice(&digest);
    hash
}
