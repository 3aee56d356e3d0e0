use crate::traits::SearchEngine;
use crate::types::{FuzzyMatchQuery, IndexerError, Result, SearchConfig, SearchResult};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a caller shows for one query: hits, or a message explaining why there are none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn is_empty_query(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// Fuzzy keyword search over the indexed descriptions.
pub struct SearchService {
    engine: Arc<dyn SearchEngine>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(engine: Arc<dyn SearchEngine>, config: SearchConfig) -> Self {
        Self { engine, config }
    }

    /// Build the service after checking the engine is reachable.
    pub async fn connect(engine: Arc<dyn SearchEngine>, config: SearchConfig) -> Result<Self> {
        match engine.ping().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(IndexerError::IndexConnection(
                    "Could not connect to search engine".to_string(),
                ))
            }
            Err(IndexerError::IndexConnection(reason)) => return Err(IndexerError::IndexConnection(reason)),
            Err(e) => return Err(IndexerError::IndexConnection(e.to_string())),
        }
        info!("Search service connected, index '{}'", config.index_name);
        Ok(Self::new(engine, config))
    }

    pub fn query_for(&self, text: &str) -> FuzzyMatchQuery {
        FuzzyMatchQuery::new(&self.config.field, text.trim(), self.config.limit)
    }

    /// Ranked hits for `text`. A blank query returns no hits without asking
    /// the engine; any engine failure comes back as `IndexerError::Query`.
    pub async fn search(&self, text: &str) -> Result<Vec<SearchResult>> {
        if text.trim().is_empty() {
            debug!("Empty query, nothing to search");
            return Ok(Vec::new());
        }

        let query = self.query_for(text);
        match self.engine.search(&self.config.index_name, &query).await {
            Ok(results) => {
                info!("Found {} result(s) for '{}'", results.len(), query.text);
                Ok(results)
            }
            Err(IndexerError::Query(message)) => Err(IndexerError::Query(message)),
            Err(e) => Err(IndexerError::Query(e.to_string())),
        }
    }

    /// Like `search`, but never fails: errors become a message on an empty response.
    pub async fn search_or_message(&self, text: &str) -> SearchResponse {
        match self.search(text).await {
            Ok(results) => SearchResponse {
                query: text.to_string(),
                results,
                error: None,
            },
            Err(e) => {
                warn!("Search for '{}' failed: {}", text, e);
                SearchResponse {
                    query: text.to_string(),
                    results: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Text shown to the user for one response.
pub fn render_response(response: &SearchResponse) -> String {
    if response.is_empty_query() {
        return "Search 🔎\n".to_string();
    }
    if let Some(error) = &response.error {
        return format!("Error: {}\n", error);
    }
    if response.results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for (i, hit) in response.results.iter().enumerate() {
        let _ = writeln!(out, "Result {}:", i + 1);
        let _ = writeln!(out, "📍 Image Path: {}", hit.image_path);
        let _ = writeln!(out, "📝 Description: {}", hit.description);
        let _ = writeln!(out, "{}", "-".repeat(60));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, description: &str) -> SearchResult {
        SearchResult {
            image_path: path.to_string(),
            description: description.to_string(),
            score: 1.0,
        }
    }

    #[test]
    fn renders_numbered_hits() {
        let response = SearchResponse {
            query: "ball".to_string(),
            results: vec![hit("a.jpg", "a ball"), hit("b.jpg", "two balls")],
            error: None,
        };
        let text = render_response(&response);
        assert!(text.starts_with("Result 1:\n📍 Image Path: a.jpg\n📝 Description: a ball\n"));
        assert!(text.contains("Result 2:"));
        assert_eq!(text.matches(&"-".repeat(60)).count(), 2);
    }

    #[test]
    fn renders_messages() {
        let empty_query = SearchResponse::default();
        assert_eq!(render_response(&empty_query), "Search 🔎\n");

        let no_hits = SearchResponse {
            query: "zebra".to_string(),
            ..Default::default()
        };
        assert_eq!(render_response(&no_hits), "No results found.\n");

        let failed = SearchResponse {
            query: "zebra".to_string(),
            error: Some("Query failed: boom".to_string()),
            ..Default::default()
        };
        assert_eq!(render_response(&failed), "Error: Query failed: boom\n");
    }
}
