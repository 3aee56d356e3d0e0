use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an image inside the description store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Described,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Described => "described",
            RecordStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image known to the description store, keyed by its normalized path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_path: String,
    pub description: Option<String>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn pending(image_path: &str) -> Self {
        Self {
            image_path: normalize_image_path(image_path),
            description: None,
            status: RecordStatus::Pending,
            error: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn described(image_path: &str, description: String) -> Self {
        Self {
            description: Some(description),
            status: RecordStatus::Described,
            ..Self::pending(image_path)
        }
    }

    pub fn failed(image_path: &str, error: String) -> Self {
        Self {
            status: RecordStatus::Failed,
            error: Some(error),
            ..Self::pending(image_path)
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_described(&self) -> bool {
        self.status == RecordStatus::Described
    }

    /// Projection into the search index. Only described records have one.
    pub fn to_search_document(&self) -> Option<SearchDocument> {
        match (&self.status, &self.description) {
            (RecordStatus::Described, Some(description)) => Some(SearchDocument {
                image_path: normalize_image_path(&self.image_path),
                description: description.clone(),
            }),
            _ => None,
        }
    }
}

/// What the search engine stores for each described image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub image_path: String,
    pub description: String,
}

impl SearchDocument {
    /// Stable identifier derived from the path, so re-indexing overwrites
    /// the previous document instead of adding another one.
    pub fn document_id(&self) -> String {
        document_id_for(&self.image_path)
    }
}

pub fn document_id_for(image_path: &str) -> String {
    let normalized = normalize_image_path(image_path);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, normalized.as_bytes()).to_string()
}

/// A ranked hit. Order comes from the engine and is never recomputed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub image_path: String,
    pub description: String,
    pub score: f64,
}

/// Forward-slash form of a path, the key used everywhere a path is stored.
/// `.` segments, repeated separators and trailing separators are dropped, so
/// `images/a.jpg`, `./images//a.jpg` and `images\.\a.jpg` share one key.
/// Purely lexical: `..` is kept and nothing is resolved against the filesystem.
pub fn normalize_image_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let prefix = if unified.starts_with("//") {
        "//"
    } else if unified.starts_with('/') {
        "/"
    } else {
        ""
    };

    let segments: Vec<&str> = unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    format!("{}{}", prefix, segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_become_forward_slashes() {
        assert_eq!(normalize_image_path(r"images\trip\beach.jpg"), "images/trip/beach.jpg");
        assert_eq!(normalize_image_path("images/a.png"), "images/a.png");
    }

    #[test]
    fn current_dir_segments_and_extra_separators_are_dropped() {
        assert_eq!(normalize_image_path("./images/a.jpg"), "images/a.jpg");
        assert_eq!(normalize_image_path("/tmp/x/./images//a.jpg"), "/tmp/x/images/a.jpg");
        assert_eq!(normalize_image_path(r".\images\.\a.jpg"), "images/a.jpg");
        assert_eq!(normalize_image_path("images/trip/"), "images/trip");
        assert_eq!(normalize_image_path("../shared/a.jpg"), "../shared/a.jpg");
        assert_eq!(normalize_image_path(r"\\nas\photos\a.jpg"), "//nas/photos/a.jpg");
        assert_eq!(document_id_for("./images/a.jpg"), document_id_for("images/a.jpg"));
    }

    #[test]
    fn document_id_ignores_separator_style() {
        assert_eq!(document_id_for(r"images\a.jpg"), document_id_for("images/a.jpg"));
        assert_ne!(document_id_for("images/a.jpg"), document_id_for("images/b.jpg"));
    }

    #[test]
    fn only_described_records_project_to_documents() {
        let described = ImageRecord::described(r"x\y.jpg", "a dog".to_string());
        let doc = described.to_search_document().unwrap();
        assert_eq!(doc.image_path, "x/y.jpg");
        assert_eq!(doc.description, "a dog");

        assert!(ImageRecord::pending("x/z.jpg").to_search_document().is_none());
        assert!(ImageRecord::failed("x/w.jpg", "boom".into()).to_search_document().is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RecordStatus::Described).unwrap();
        assert_eq!(json, "\"described\"");
    }
}
