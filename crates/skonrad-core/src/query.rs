//! Query qualifier DSL.
//!
//! Qualifiers are `@word` tokens anywhere in the raw query:
//! - file type: `@image`, `@video`, `@audio`
//! - screenshots: `@ss` (only), `@nss` (exclude)
//! - metric: `@lex`, `@sem`, `@dlex`, `@dsem`, `@olex`, `@osem`, `@tlex`,
//!   `@tsem`, `@clip`; the default is hybrid
//!
//! Unknown qualifiers are stripped and ignored.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::store::FileType;

static QUALIFIERS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\S+)").unwrap());

/// Retrieval strategy selected by the metric qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMetric {
    /// RRF over combined lexical, combined semantic and CLIP.
    Hybrid,
    /// Weighted sum over the three lexical dimensions.
    CombinedLexical,
    /// Weighted sum over the three dense text dimensions.
    CombinedSemantic,
    DescriptionLexical,
    DescriptionSemantic,
    OcrTextLexical,
    OcrTextSemantic,
    TranscriptLexical,
    TranscriptSemantic,
    /// CLIP image + CLIP video, fused.
    Clip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSearchQuery {
    pub query_text: String,
    pub search_metric: SearchMetric,
    pub file_type: Option<FileType>,
    pub only_screenshot: bool,
    pub no_screenshots: bool,
}

#[derive(Debug, Default)]
pub struct SearchQueryParser;

impl SearchQueryParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw_query: &str) -> ParsedSearchQuery {
        let mut search_metric = SearchMetric::Hybrid;
        let mut file_type = None;
        let mut only_screenshot = false;
        let mut no_screenshots = false;

        for capture in QUALIFIERS_RE.captures_iter(raw_query) {
            match &capture[1] {
                "image" => file_type = Some(FileType::Image),
                "video" => file_type = Some(FileType::Video),
                "audio" => file_type = Some(FileType::Audio),
                "ss" => only_screenshot = true,
                "nss" => no_screenshots = true,
                "lex" => search_metric = SearchMetric::CombinedLexical,
                "sem" => search_metric = SearchMetric::CombinedSemantic,
                "dlex" => search_metric = SearchMetric::DescriptionLexical,
                "dsem" => search_metric = SearchMetric::DescriptionSemantic,
                "olex" => search_metric = SearchMetric::OcrTextLexical,
                "osem" => search_metric = SearchMetric::OcrTextSemantic,
                "tlex" => search_metric = SearchMetric::TranscriptLexical,
                "tsem" => search_metric = SearchMetric::TranscriptSemantic,
                "clip" => search_metric = SearchMetric::Clip,
                other => tracing::debug!("ignoring unknown query qualifier @{other}"),
            }
        }

        ParsedSearchQuery {
            query_text: QUALIFIERS_RE.replace_all(raw_query, "").trim().to_string(),
            search_metric,
            file_type,
            only_screenshot,
            no_screenshots,
        }
    }
}
