//! Builds the three lexical engines from stored file rows at directory init.

use anyhow::Result;

use super::LexicalSearchEngine;
use crate::engines::LemmatizerEngine;
use crate::store::FileStore;

/// Walks all file rows, lemmatizing any text field that has not been
/// lemmatized yet (persisting the joined lemma string back to the row), and
/// registers the tokens with the matching engine.
pub struct LexicalSearchEngineInitializer {
    pub description_engine: LexicalSearchEngine,
    pub ocr_text_engine: LexicalSearchEngine,
    pub transcript_engine: LexicalSearchEngine,
}

impl LexicalSearchEngineInitializer {
    pub fn new(lemmatizer: LemmatizerEngine) -> Self {
        Self {
            description_engine: LexicalSearchEngine::new(lemmatizer.clone()),
            ocr_text_engine: LexicalSearchEngine::new(lemmatizer.clone()),
            transcript_engine: LexicalSearchEngine::new(lemmatizer),
        }
    }

    pub async fn init_search_engines(&mut self, store: &FileStore) -> Result<()> {
        let files = store.load_all_files()?;
        tracing::info!("initializing lexical engines over {} files", files.len());
        for mut file in files {
            let mut dirty = false;
            dirty |= Self::index_field(
                &mut self.description_engine,
                Some(&file.description),
                &mut file.lemmatized_description,
                file.id,
            )
            .await?;
            if file.is_ocr_analyzed {
                dirty |= Self::index_field(
                    &mut self.ocr_text_engine,
                    file.ocr_text.as_deref(),
                    &mut file.lemmatized_ocr_text,
                    file.id,
                )
                .await?;
            }
            if file.is_transcript_analyzed {
                dirty |= Self::index_field(
                    &mut self.transcript_engine,
                    file.transcript.as_deref(),
                    &mut file.lemmatized_transcript,
                    file.id,
                )
                .await?;
            }
            if dirty {
                store.update_file(&file)?;
            }
        }
        Ok(())
    }

    /// Register one file's single-field text into its engine, lemmatizing if
    /// the cached lemma string is missing. Returns whether the row changed.
    async fn index_field(
        engine: &mut LexicalSearchEngine,
        text: Option<&str>,
        lemmatized: &mut Option<String>,
        file_id: i64,
    ) -> Result<bool> {
        let Some(text) = text else {
            return Ok(false);
        };
        if text.is_empty() {
            return Ok(false);
        }
        let mut dirty = false;
        if lemmatized.is_none() {
            let tokens = engine.lemmatizer().lemmatize(text).await?;
            *lemmatized = Some(tokens.join(" "));
            dirty = true;
        }
        if let Some(lemmas) = lemmatized.as_deref() {
            engine.register_text(lemmas, file_id);
        }
        Ok(dirty)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::LemmatizerEngine;
    use crate::store::{FileStore, FileType, NewFile};
    use crate::testing::stub_model_manager;

    fn initializer() -> LexicalSearchEngineInitializer {
        LexicalSearchEngineInitializer::new(LemmatizerEngine::new(stub_model_manager()))
    }

    #[tokio::test]
    async fn test_init_lemmatizes_and_persists_missing_fields() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "cat.png".into(),
                file_type: FileType::Image,
                description: "A Cat On A Sofa".into(),
                ..Default::default()
            })
            .unwrap();

        let mut init = initializer();
        init.init_search_engines(&store).await.unwrap();

        let file = store.get_file_by_id(id).unwrap().unwrap();
        assert_eq!(file.lemmatized_description.as_deref(), Some("a cat on a sofa"));

        let results = init.description_engine.search("cat").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, id);
    }

    #[tokio::test]
    async fn test_init_skips_unanalyzed_ocr_and_transcript() {
        let store = FileStore::in_memory().unwrap();
        store
            .add_file(&NewFile {
                name: "shot.png".into(),
                file_type: FileType::Image,
                ocr_text: Some("Submit".into()),
                is_ocr_analyzed: false,
                ..Default::default()
            })
            .unwrap();

        let mut init = initializer();
        init.init_search_engines(&store).await.unwrap();

        assert!(init.ocr_text_engine.search("submit").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_indexes_analyzed_transcript() {
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "clip.mp4".into(),
                file_type: FileType::Video,
                description: "birthday party".into(),
                transcript: Some("happy birthday".into()),
                is_transcript_analyzed: true,
                ..Default::default()
            })
            .unwrap();

        let mut init = initializer();
        init.init_search_engines(&store).await.unwrap();

        let results = init.transcript_engine.search("birthday").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, id);
        assert!(!init.description_engine.search("party").await.unwrap().is_empty());
    }
}
