use crate::types::{BulkItemOutcome, CaptionError, FuzzyMatchQuery, Result, SearchDocument, SearchResult};
use async_trait::async_trait;
use std::path::Path;

/// External service that turns an image into a natural-language description.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Human-readable name used in logs
    fn captioner_name(&self) -> String;

    /// Describe one image. Every failure, including unreadable files,
    /// comes back as a `CaptionError` for that image.
    async fn describe(&self, image_path: &Path) -> std::result::Result<String, CaptionError>;
}

/// Full-text search engine holding the derived index.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Check the engine answers at all
    async fn ping(&self) -> Result<bool>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index with default settings
    async fn create_index(&self, index: &str) -> Result<()>;

    /// Submit documents in one call. `ids`, when given, pairs one id with each document.
    /// Returns one outcome per document, in submission order.
    async fn bulk_index(
        &self,
        index: &str,
        documents: &[SearchDocument],
        ids: Option<&[String]>,
    ) -> Result<Vec<BulkItemOutcome>>;

    /// Run a fuzzy match query and return ranked hits
    async fn search(&self, index: &str, query: &FuzzyMatchQuery) -> Result<Vec<SearchResult>>;
}
