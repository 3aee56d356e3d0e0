use serde::Serialize;
use std::path::PathBuf;

pub use interfaces::defs::{
    document_id_for, normalize_image_path, ImageRecord, RecordStatus, SearchDocument, SearchResult,
};

pub const DEFAULT_PROMPT: &str = "Describe the content of this image.";
pub const DEFAULT_INDEX: &str = "imageindex";

/// Extensions picked up by the locator, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone)]
pub struct CaptionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            max_tokens: 500,
            timeout_seconds: 60,
            user_agent: "memory-lens/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_certs: bool,
    pub timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "https://localhost:9200".to_string(),
            username: None,
            password: None,
            verify_certs: true,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub image_root: PathBuf,
    pub store_path: PathBuf,
    /// Parallel caption requests. 1 reproduces strictly sequential processing.
    pub concurrency: usize,
    /// Save the store after this many processed images; 0 saves only at the end.
    pub checkpoint_every: usize,
    /// Failed images stop being retried once they reach this many attempts; 0 means never stop.
    pub max_attempts: u32,
    /// Extra in-run attempts for transient caption failures.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("images"),
            store_path: PathBuf::from("responses.json"),
            concurrency: 1,
            checkpoint_every: 25,
            max_attempts: 3,
            retries: 2,
            retry_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub index_name: String,
    pub batch_size: usize,
    pub stable_ids: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX.to_string(),
            batch_size: 500,
            stable_ids: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub index_name: String,
    pub field: String,
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX.to_string(),
            field: "description".to_string(),
            limit: 10,
        }
    }
}

/// A directory entry the locator could not read. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("cannot read {path}: {reason}")]
pub struct DiscoveryError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CaptionErrorKind {
    /// The image file itself could not be read.
    Io(String),
    /// Connection failure or anything else below HTTP.
    Transport(String),
    Timeout,
    /// The service answered with a non-success status.
    Service { status: u16, body: String },
    /// The service answered 2xx but without usable text.
    EmptyResponse,
    Malformed(String),
}

/// Failure to caption one image. Always carries the image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("captioning {image_path} failed: {}", describe_kind(.kind))]
pub struct CaptionError {
    pub image_path: String,
    pub kind: CaptionErrorKind,
}

fn describe_kind(kind: &CaptionErrorKind) -> String {
    match kind {
        CaptionErrorKind::Io(e) => format!("cannot read image: {}", e),
        CaptionErrorKind::Transport(e) => format!("transport error: {}", e),
        CaptionErrorKind::Timeout => "request timed out".to_string(),
        CaptionErrorKind::Service { status, body } => format!("service returned HTTP {}: {}", status, body),
        CaptionErrorKind::EmptyResponse => "service returned no text".to_string(),
        CaptionErrorKind::Malformed(e) => format!("malformed response: {}", e),
    }
}

impl CaptionError {
    pub fn new(image_path: &str, kind: CaptionErrorKind) -> Self {
        Self {
            image_path: normalize_image_path(image_path),
            kind,
        }
    }

    /// Worth another attempt within the same run.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            CaptionErrorKind::Transport(_) | CaptionErrorKind::Timeout => true,
            CaptionErrorKind::Service { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short reason stored on the failed record.
    pub fn reason(&self) -> String {
        describe_kind(&self.kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Discovery failed: {0}")]
    Discovery(DiscoveryError),

    #[error("Failed to write store {path}: {reason}")]
    StoreWrite { path: PathBuf, reason: String },

    #[error("Search engine unreachable: {0}")]
    IndexConnection(String),

    #[error("{failed} of {total} documents failed to index")]
    BulkPartialFailure { failed: usize, total: usize },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub discovered: usize,
    pub skipped_described: usize,
    pub skipped_exhausted: usize,
    pub described: usize,
    pub failed: Vec<CaptionError>,
    pub discovery_errors: Vec<DiscoveryError>,
    pub checkpoints: usize,
    pub store_recovered: bool,
}

impl IngestReport {
    pub fn processed(&self) -> usize {
        self.described + self.failed.len()
    }
}

/// One document the engine refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub image_path: String,
    pub reason: String,
}

/// Outcome of one bulk indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub index_name: String,
    pub index_created: bool,
    pub submitted: usize,
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
    pub skipped_undescribed: usize,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-document result of a bulk call, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemOutcome {
    pub document_id: Option<String>,
    pub error: Option<String>,
}

impl BulkItemOutcome {
    pub fn ok(document_id: Option<String>) -> Self {
        Self { document_id, error: None }
    }

    pub fn failed(document_id: Option<String>, reason: String) -> Self {
        Self { document_id, error: Some(reason) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The only read the search service issues: a fuzzy match on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatchQuery {
    pub field: String,
    pub text: String,
    pub fuzziness: String,
    pub size: usize,
}

impl FuzzyMatchQuery {
    pub fn new(field: &str, text: &str, size: usize) -> Self {
        Self {
            field: field.to_string(),
            text: text.to_string(),
            fuzziness: "AUTO".to_string(),
            size,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut match_clause = serde_json::Map::new();
        match_clause.insert(
            self.field.clone(),
            serde_json::json!({
                "query": self.text,
                "fuzziness": self.fuzziness,
            }),
        );
        serde_json::json!({
            "size": self.size,
            "query": { "match": match_clause },
        })
    }
}
