use crate::traits::SearchEngine;
use crate::types::{BulkItemOutcome, EngineConfig, FuzzyMatchQuery, IndexerError, Result, SearchDocument, SearchResult};
use crate::utils::text::{levenshtein, auto_fuzziness, tokenize, truncate};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Search engine reached over the Elasticsearch REST API.
pub struct ElasticsearchClient {
    client: Client,
    base: Url,
    config: EngineConfig,
}

impl ElasticsearchClient {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut base = Url::parse(&config.host)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        if !config.verify_certs {
            warn!("TLS certificate verification disabled for {}", base);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;

        Ok(Self { client, base, config })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base.join(path)?;
        let mut request = self.client.request(method, url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        Ok(request)
    }
}

fn connection_error(e: reqwest::Error) -> IndexerError {
    IndexerError::IndexConnection(e.to_string())
}

#[async_trait]
impl SearchEngine for ElasticsearchClient {
    async fn ping(&self) -> Result<bool> {
        let response = self.request(Method::GET, "")?.send().await.map_err(connection_error)?;
        let status = response.status();
        if !status.is_success() {
            warn!("Ping to {} answered HTTP {}", self.base, status);
        }
        Ok(status.is_success())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, index)?.send().await.map_err(connection_error)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(IndexerError::General(format!("checking index {} returned HTTP {}", index, status))),
        }
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let response = self.request(Method::PUT, index)?.send().await.map_err(connection_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            debug!("Index {} was created concurrently", index);
            return Ok(());
        }
        Err(IndexerError::General(format!(
            "creating index {} returned HTTP {}: {}",
            index,
            status,
            truncate(&body, 300)
        )))
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[SearchDocument],
        ids: Option<&[String]>,
    ) -> Result<Vec<BulkItemOutcome>> {
        let body = build_bulk_body(index, documents, ids)?;
        let response = self
            .request(Method::POST, "_bulk")?
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        let text = response.text().await.map_err(connection_error)?;
        if !status.is_success() {
            return Err(IndexerError::General(format!(
                "bulk request returned HTTP {}: {}",
                status,
                truncate(&text, 300)
            )));
        }

        parse_bulk_response(&text, documents.len())
    }

    async fn search(&self, index: &str, query: &FuzzyMatchQuery) -> Result<Vec<SearchResult>> {
        let path = format!("{}/_search", index);
        let response = self
            .request(Method::POST, &path)?
            .json(&query.to_json())
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        let text = response.text().await.map_err(connection_error)?;
        if !status.is_success() {
            return Err(IndexerError::Query(format!("HTTP {}: {}", status, truncate(&text, 300))));
        }

        parse_search_response(&text, &query.field)
    }
}

/// NDJSON body for the bulk API: an action line then a source line per document.
pub fn build_bulk_body(index: &str, documents: &[SearchDocument], ids: Option<&[String]>) -> Result<String> {
    if let Some(ids) = ids {
        if ids.len() != documents.len() {
            return Err(IndexerError::General(format!(
                "{} ids given for {} documents",
                ids.len(),
                documents.len()
            )));
        }
    }

    let mut body = String::new();
    for (i, document) in documents.iter().enumerate() {
        let action = match ids {
            Some(ids) => serde_json::json!({"index": {"_index": index, "_id": ids[i]}}),
            None => serde_json::json!({"index": {"_index": index}}),
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

/// One outcome per submitted document. Items the engine left out count as failures.
pub fn parse_bulk_response(body: &str, expected: usize) -> Result<Vec<BulkItemOutcome>> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let items = value
        .get("items")
        .and_then(|items| items.as_array())
        .ok_or_else(|| IndexerError::General("bulk response has no items".to_string()))?;

    let mut outcomes: Vec<BulkItemOutcome> = items
        .iter()
        .take(expected)
        .map(|item| {
            // keyed by the action name: index, create, ...
            let result = item.as_object().and_then(|obj| obj.values().next());
            let id = result
                .and_then(|r| r.get("_id"))
                .and_then(|id| id.as_str())
                .map(|id| id.to_string());
            match result.and_then(|r| r.get("error")) {
                Some(error) => BulkItemOutcome::failed(id, describe_bulk_error(error)),
                None => BulkItemOutcome::ok(id),
            }
        })
        .collect();

    while outcomes.len() < expected {
        outcomes.push(BulkItemOutcome::failed(None, "no result returned by engine".to_string()));
    }
    Ok(outcomes)
}

fn describe_bulk_error(error: &serde_json::Value) -> String {
    if let Some(text) = error.as_str() {
        return text.to_string();
    }
    let kind = error.get("type").and_then(|t| t.as_str()).unwrap_or("error");
    match error.get("reason").and_then(|r| r.as_str()) {
        Some(reason) => format!("{}: {}", kind, reason),
        None => kind.to_string(),
    }
}

/// Hits in engine order. Also reads documents indexed with the older
/// `response` field instead of `description`.
pub fn parse_search_response(body: &str, field: &str) -> Result<Vec<SearchResult>> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| IndexerError::Query(format!("unreadable search response: {}", e)))?;
    let hits = value
        .pointer("/hits/hits")
        .and_then(|hits| hits.as_array())
        .ok_or_else(|| IndexerError::Query("search response has no hits".to_string()))?;

    let results = hits
        .iter()
        .filter_map(|hit| {
            let source = hit.get("_source")?;
            let image_path = source.get("image_path")?.as_str()?.to_string();
            let description = source
                .get(field)
                .or_else(|| source.get("description"))
                .or_else(|| source.get("response"))
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            Some(SearchResult {
                image_path,
                description,
                score,
            })
        })
        .collect();

    Ok(results)
}

#[derive(Debug, Default)]
struct MemoryState {
    unreachable: bool,
    indices: HashMap<String, Vec<(String, SearchDocument)>>,
    rejected: Vec<String>,
    query_failure: Option<String>,
    failing_bulk_calls: usize,
    bulk_calls: usize,
    next_id: u64,
}

/// Search engine kept in memory, for tests and offline runs. Matches terms
/// with the same AUTO edit budget the real engine uses.
#[derive(Debug, Default)]
pub struct InMemorySearchEngine {
    state: RwLock<MemoryState>,
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the engine were down.
    pub fn unreachable() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                unreachable: true,
                ..Default::default()
            }),
        }
    }

    /// Refuse documents whose path ends with `suffix`.
    pub async fn reject(&self, suffix: &str) {
        self.state.write().await.rejected.push(suffix.to_string());
    }

    /// The next `calls` bulk requests fail as a whole, as an oversized or
    /// rejected request would.
    pub async fn fail_bulk_calls(&self, calls: usize) {
        self.state.write().await.failing_bulk_calls = calls;
    }

    /// Make every search fail with `message`.
    pub async fn fail_queries(&self, message: &str) {
        self.state.write().await.query_failure = Some(message.to_string());
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.state.write().await.unreachable = !reachable;
    }

    pub async fn has_index(&self, index: &str) -> bool {
        self.state.read().await.indices.contains_key(index)
    }

    pub async fn document_count(&self, index: &str) -> usize {
        self.state.read().await.indices.get(index).map(|docs| docs.len()).unwrap_or(0)
    }

    pub async fn documents(&self, index: &str) -> Vec<SearchDocument> {
        self.state
            .read()
            .await
            .indices
            .get(index)
            .map(|docs| docs.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn bulk_calls(&self) -> usize {
        self.state.read().await.bulk_calls
    }

    fn check_reachable(state: &MemoryState) -> Result<()> {
        if state.unreachable {
            Err(IndexerError::IndexConnection("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn fuzzy_score(query_terms: &[String], text: &str) -> f64 {
    let terms = tokenize(text);
    query_terms
        .iter()
        .filter_map(|q| {
            terms
                .iter()
                .map(|t| levenshtein(q, t))
                .filter(|distance| *distance <= auto_fuzziness(q))
                .min()
        })
        .map(|distance| 1.0 / (1.0 + distance as f64))
        .sum()
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    async fn ping(&self) -> Result<bool> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        Ok(true)
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        Ok(state.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_reachable(&state)?;
        state.indices.entry(index.to_string()).or_default();
        info!("Created in-memory index {}", index);
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[SearchDocument],
        ids: Option<&[String]>,
    ) -> Result<Vec<BulkItemOutcome>> {
        let mut state = self.state.write().await;
        Self::check_reachable(&state)?;
        state.bulk_calls += 1;
        if state.failing_bulk_calls > 0 {
            state.failing_bulk_calls -= 1;
            return Err(IndexerError::General(
                "bulk request returned HTTP 413 Payload Too Large".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(documents.len());
        for (i, document) in documents.iter().enumerate() {
            let rejected = state.rejected.iter().any(|suffix| document.image_path.ends_with(suffix.as_str()));
            let id = match ids.and_then(|ids| ids.get(i)) {
                Some(id) => id.clone(),
                None => {
                    state.next_id += 1;
                    format!("auto-{}", state.next_id)
                }
            };

            if rejected {
                outcomes.push(BulkItemOutcome::failed(
                    Some(id),
                    "mapper_parsing_exception: document rejected".to_string(),
                ));
                continue;
            }

            let docs = state.indices.entry(index.to_string()).or_default();
            match docs.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = document.clone(),
                None => docs.push((id.clone(), document.clone())),
            }
            outcomes.push(BulkItemOutcome::ok(Some(id)));
        }

        Ok(outcomes)
    }

    async fn search(&self, index: &str, query: &FuzzyMatchQuery) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        Self::check_reachable(&state)?;
        if let Some(message) = &state.query_failure {
            return Err(IndexerError::Query(message.clone()));
        }
        let docs = state
            .indices
            .get(index)
            .ok_or_else(|| IndexerError::Query(format!("index_not_found_exception: no such index [{}]", index)))?;

        let query_terms = tokenize(&query.text);
        let mut hits: Vec<SearchResult> = docs
            .iter()
            .filter_map(|(_, doc)| {
                let text = if query.field == "image_path" { &doc.image_path } else { &doc.description };
                let score = fuzzy_score(&query_terms, text);
                (score > 0.0).then(|| SearchResult {
                    image_path: doc.image_path.clone(),
                    description: doc.description.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.size);
        Ok(hits)
    }
}
