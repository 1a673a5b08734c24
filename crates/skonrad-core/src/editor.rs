//! User edits to description, transcript and OCR text.
//!
//! An edit flows through both retrieval sides in one critical section: the old
//! lemmas leave the lexical engine, the new text is lemmatized and registered,
//! the dense row is re-embedded, and the file row is persisted. Edits take the
//! directory write lock, so readers never observe a half-applied edit.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::RwLock;

use crate::lexical::LexicalSearchEngine;
use crate::processor::TextKind;
use crate::search::SearchIndexes;
use crate::store::{FileRecord, FileStore};

pub struct MetadataEditor {
    store: Arc<FileStore>,
    indexes: Arc<RwLock<SearchIndexes>>,
}

impl MetadataEditor {
    pub fn new(store: Arc<FileStore>, indexes: Arc<RwLock<SearchIndexes>>) -> Self {
        Self { store, indexes }
    }

    pub async fn update_description(&self, file_id: i64, new_description: &str) -> Result<()> {
        let mut file = self.get_file(file_id)?;
        let mut indexes = self.indexes.write().await;

        let old_description = std::mem::take(&mut file.description);
        file.lemmatized_description = Self::update_lexical_structures(
            &mut indexes.description_lexical,
            file_id,
            new_description,
            file.lemmatized_description.take(),
        )
        .await?;
        file.description = new_description.to_string();

        indexes
            .embeddings
            .update_text_embedding(&file, &old_description, TextKind::Description)
            .await?;
        self.store.update_file(&file)
    }

    pub async fn update_transcript(&self, file_id: i64, new_transcript: &str) -> Result<()> {
        let mut file = self.get_file(file_id)?;
        let mut indexes = self.indexes.write().await;

        let old_transcript = file.transcript.take().unwrap_or_default();
        file.lemmatized_transcript = Self::update_lexical_structures(
            &mut indexes.transcript_lexical,
            file_id,
            new_transcript,
            file.lemmatized_transcript.take(),
        )
        .await?;
        file.transcript = Some(new_transcript.to_string());
        // a manual correction counts as analyzed and fixed
        file.is_transcript_analyzed = true;
        file.is_transcript_fixed = true;

        indexes
            .embeddings
            .update_text_embedding(&file, &old_transcript, TextKind::Transcript)
            .await?;
        self.store.update_file(&file)
    }

    pub async fn update_ocr_text(&self, file_id: i64, new_ocr_text: &str) -> Result<()> {
        let mut file = self.get_file(file_id)?;
        let mut indexes = self.indexes.write().await;

        let old_ocr_text = file.ocr_text.take().unwrap_or_default();
        file.lemmatized_ocr_text = Self::update_lexical_structures(
            &mut indexes.ocr_lexical,
            file_id,
            new_ocr_text,
            file.lemmatized_ocr_text.take(),
        )
        .await?;
        file.ocr_text = Some(new_ocr_text.to_string());

        indexes
            .embeddings
            .update_text_embedding(&file, &old_ocr_text, TextKind::OcrText)
            .await?;
        self.store.update_file(&file)
    }

    /// Swap one text dimension's tokens: unregister the old lemma string,
    /// lemmatize and register the new text, and return the new lemma string
    /// (None when the text was emptied).
    async fn update_lexical_structures(
        engine: &mut LexicalSearchEngine,
        file_id: i64,
        new_text: &str,
        old_lemmatized: Option<String>,
    ) -> Result<Option<String>> {
        if let Some(old) = old_lemmatized.as_deref() {
            engine.unregister_text(old, file_id);
        }
        if new_text.is_empty() {
            return Ok(None);
        }
        let lemmas = engine.lemmatizer().lemmatize(new_text).await?.join(" ");
        engine.register_text(&lemmas, file_id);
        Ok(Some(lemmas))
    }

    fn get_file(&self, file_id: i64) -> Result<FileRecord> {
        match self.store.get_file_by_id(file_id)? {
            Some(file) => Ok(file),
            None => bail!("no file with id {file_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{
        ClipEngine, ImageEmbeddingEngine, LemmatizerEngine, TextEmbeddingEngine,
    };
    use crate::lexical::LexicalSearchEngineInitializer;
    use crate::persistence::{EmbeddingPersistor, ExpectedTexts};
    use crate::processor::EmbeddingProcessor;
    use crate::search::SearchService;
    use crate::store::{FileType, NewFile};
    use crate::testing::{encode_png, stub_model_manager, StubVideoProber};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<FileStore>,
        indexes: Arc<RwLock<SearchIndexes>>,
    }

    impl Fixture {
        async fn new(files: &[NewFile]) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(FileStore::in_memory().unwrap());
            for file in files {
                std::fs::write(dir.path().join(&file.name), encode_png(7, 7, 7)).unwrap();
                store.add_file(file).unwrap();
            }

            let manager = stub_model_manager();
            let mut initializer =
                LexicalSearchEngineInitializer::new(LemmatizerEngine::new(manager.clone()));
            initializer.init_search_engines(&store).await.unwrap();

            let mut embeddings = EmbeddingProcessor::new(
                dir.path().to_path_buf(),
                EmbeddingPersistor::new(dir.path()).unwrap(),
                TextEmbeddingEngine::new(manager.clone()),
                ImageEmbeddingEngine::new(manager.clone()),
                ClipEngine::new(manager),
                Arc::new(StubVideoProber::default()),
            );
            embeddings.init_embeddings(&store).await.unwrap();

            let indexes = Arc::new(RwLock::new(SearchIndexes {
                description_lexical: initializer.description_engine,
                ocr_lexical: initializer.ocr_text_engine,
                transcript_lexical: initializer.transcript_engine,
                embeddings,
            }));
            Self {
                _dir: dir,
                store,
                indexes,
            }
        }

        fn editor(&self) -> MetadataEditor {
            MetadataEditor::new(self.store.clone(), self.indexes.clone())
        }

        fn service(&self) -> SearchService {
            SearchService::new(self.store.clone(), self.indexes.clone())
        }
    }

    fn cat_file() -> NewFile {
        NewFile {
            name: "cat.png".into(),
            file_type: FileType::Image,
            description: "a cat".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_edit_propagates_to_both_sides() {
        let fixture = Fixture::new(&[cat_file()]).await;
        let id = fixture.store.get_file_by_name("cat.png").unwrap().unwrap().id;

        fixture
            .editor()
            .update_description(id, "a pink elephant")
            .await
            .unwrap();

        let service = fixture.service();
        let (cat_hits, _) = service.search("cat @dlex", 0, None).await.unwrap();
        assert!(cat_hits.is_empty());
        let (elephant_hits, _) = service.search("elephant @dlex", 0, None).await.unwrap();
        assert_eq!(elephant_hits.len(), 1);
        assert_eq!(elephant_hits[0].file.id, id);
        let (semantic_hits, _) = service.search("pink elephant @dsem", 0, None).await.unwrap();
        assert_eq!(semantic_hits[0].file.id, id);

        // the persisted record reloads against the new text
        let indexes = fixture.indexes.read().await;
        let stored = indexes.embeddings.persistor().load(
            "cat.png",
            ExpectedTexts {
                description: "a pink elephant",
                ocr_text: None,
                transcript: None,
            },
        );
        assert!(stored.description.is_some());
        let stale = indexes.embeddings.persistor().load(
            "cat.png",
            ExpectedTexts {
                description: "a cat",
                ocr_text: None,
                transcript: None,
            },
        );
        assert!(stale.description.is_none());

        let file = fixture.store.get_file_by_id(id).unwrap().unwrap();
        assert_eq!(file.description, "a pink elephant");
        assert_eq!(file.lemmatized_description.as_deref(), Some("a pink elephant"));
    }

    #[tokio::test]
    async fn test_edit_round_trip_restores_lexical_state() {
        let fixture = Fixture::new(&[cat_file()]).await;
        let id = fixture.store.get_file_by_name("cat.png").unwrap().unwrap().id;
        let editor = fixture.editor();

        editor.update_description(id, "foo bar foo").await.unwrap();
        editor.update_description(id, "a cat").await.unwrap();

        let indexes = fixture.indexes.read().await;
        let engine = &indexes.description_lexical;
        assert_eq!(engine.reverse_index.lookup("a"), &[id]);
        assert_eq!(engine.reverse_index.lookup("cat"), &[id]);
        assert_eq!(engine.reverse_index.lookup("foo"), &[] as &[i64]);
        assert_eq!(engine.reverse_index.lookup("bar"), &[] as &[i64]);
        assert_eq!(engine.reverse_index.len(), 2);
        assert_eq!(engine.token_stats.occurrences(id, "cat"), 1);
        assert_eq!(engine.token_stats.occurrences(id, "foo"), 0);
        assert_eq!(engine.token_stats.number_of_items(), 1);
        assert_eq!(engine.token_stats.avg_item_length(), 2.0);
    }

    #[tokio::test]
    async fn test_emptying_description_clears_lemmas() {
        let fixture = Fixture::new(&[cat_file()]).await;
        let id = fixture.store.get_file_by_name("cat.png").unwrap().unwrap().id;

        fixture.editor().update_description(id, "").await.unwrap();

        let file = fixture.store.get_file_by_id(id).unwrap().unwrap();
        assert_eq!(file.description, "");
        assert!(file.lemmatized_description.is_none());
        let (hits, total) = fixture.service().search("cat @dlex", 0, None).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_transcript_edit_marks_fixed() {
        let fixture = Fixture::new(&[NewFile {
            name: "talk.mp3".into(),
            file_type: FileType::Audio,
            transcript: Some("old words".into()),
            is_transcript_analyzed: true,
            ..Default::default()
        }])
        .await;
        let id = fixture.store.get_file_by_name("talk.mp3").unwrap().unwrap().id;

        fixture
            .editor()
            .update_transcript(id, "corrected words")
            .await
            .unwrap();

        let file = fixture.store.get_file_by_id(id).unwrap().unwrap();
        assert!(file.is_transcript_fixed);
        assert_eq!(file.transcript.as_deref(), Some("corrected words"));
        let (hits, _) = fixture.service().search("corrected @tlex", 0, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_edit_of_missing_file_fails() {
        let fixture = Fixture::new(&[]).await;
        assert!(fixture.editor().update_description(42, "x").await.is_err());
    }
}
