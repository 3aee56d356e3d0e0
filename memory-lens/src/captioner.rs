use crate::traits::Captioner;
use crate::types::{CaptionConfig, CaptionError, CaptionErrorKind, IndexerError, Result};
use crate::utils::path::{mime_type_for, to_key};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Captioner backed by an OpenAI-compatible chat completions endpoint.
/// One request per image, no retries of its own.
pub struct OpenAiCaptioner {
    client: Client,
    config: CaptionConfig,
    endpoint: String,
}

impl OpenAiCaptioner {
    pub fn new(config: CaptionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(IndexerError::Config("captioning API key is empty".to_string()));
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    async fn request(&self, key: &str, body: serde_json::Value) -> std::result::Result<String, CaptionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(key, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(key, e))?;

        if !status.is_success() {
            return Err(CaptionError::new(
                key,
                CaptionErrorKind::Service {
                    status: status.as_u16(),
                    body: crate::utils::text::truncate(&text, 300),
                },
            ));
        }

        parse_completion(key, &text)
    }
}

#[async_trait]
impl Captioner for OpenAiCaptioner {
    fn captioner_name(&self) -> String {
        format!("openai-compatible ({})", self.config.model)
    }

    async fn describe(&self, image_path: &Path) -> std::result::Result<String, CaptionError> {
        let key = to_key(image_path);
        let start = Instant::now();

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| CaptionError::new(&key, CaptionErrorKind::Io(e.to_string())))?;

        let data_url = image_data_url(&bytes, mime_type_for(image_path));
        let body = build_request_body(&self.config.model, &self.config.prompt, &data_url, self.config.max_tokens);

        debug!("Captioning {} ({} bytes)", key, bytes.len());
        let description = self.request(&key, body).await?;
        debug!("Captioned {} in {}ms", key, start.elapsed().as_millis());

        Ok(description)
    }
}

fn transport_error(key: &str, e: reqwest::Error) -> CaptionError {
    if e.is_timeout() {
        CaptionError::new(key, CaptionErrorKind::Timeout)
    } else {
        CaptionError::new(key, CaptionErrorKind::Transport(e.to_string()))
    }
}

pub fn image_data_url(bytes: &[u8], mime: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime, b64)
}

/// Chat completion request: one user message with the instruction and the inlined image.
pub fn build_request_body(model: &str, prompt: &str, data_url: &str, max_tokens: u32) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            }
        ],
        "max_tokens": max_tokens
    })
}

/// First completion's text, trimmed. Empty or missing text is an error.
pub fn parse_completion(key: &str, body: &str) -> std::result::Result<String, CaptionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| CaptionError::new(key, CaptionErrorKind::Malformed(e.to_string())))?;

    let choices = value
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| CaptionError::new(key, CaptionErrorKind::Malformed("no choices in response".to_string())))?;

    let content = choices
        .first()
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|content| content.as_str())
        .map(str::trim)
        .unwrap_or("");

    if content.is_empty() {
        return Err(CaptionError::new(key, CaptionErrorKind::EmptyResponse));
    }

    Ok(content.to_string())
}

/// Scripted captioner for development and testing.
/// Describes every image from its file name unless told otherwise.
pub struct MockCaptioner {
    name: String,
    descriptions: HashMap<String, String>,
    failures: HashMap<String, (usize, CaptionErrorKind)>,
    response_delay_ms: u64,
    calls: AtomicUsize,
    calls_by_path: Mutex<HashMap<String, usize>>,
}

impl MockCaptioner {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            descriptions: HashMap::new(),
            failures: HashMap::new(),
            response_delay_ms: 0,
            calls: AtomicUsize::new(0),
            calls_by_path: Mutex::new(HashMap::new()),
        }
    }

    /// Fixed description for every image whose path ends with `suffix`.
    pub fn with_description(mut self, suffix: &str, description: &str) -> Self {
        self.descriptions.insert(suffix.to_string(), description.to_string());
        self
    }

    /// Every call for a path ending with `suffix` fails.
    pub fn failing(self, suffix: &str, kind: CaptionErrorKind) -> Self {
        self.failing_times(suffix, usize::MAX, kind)
    }

    /// The first `times` calls for a path ending with `suffix` fail.
    pub fn failing_times(mut self, suffix: &str, times: usize, kind: CaptionErrorKind) -> Self {
        self.failures.insert(suffix.to_string(), (times, kind));
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn calls_for(&self, suffix: &str) -> usize {
        let calls = self.calls_by_path.lock().await;
        calls
            .iter()
            .filter(|(path, _)| path.ends_with(suffix))
            .map(|(_, count)| *count)
            .sum()
    }

    fn lookup<'a, T>(map: &'a HashMap<String, T>, key: &str) -> Option<&'a T> {
        map.iter()
            .filter(|(suffix, _)| key.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, value)| value)
    }
}

#[async_trait]
impl Captioner for MockCaptioner {
    fn captioner_name(&self) -> String {
        format!("mock ({})", self.name)
    }

    async fn describe(&self, image_path: &Path) -> std::result::Result<String, CaptionError> {
        let key = to_key(image_path);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let call_number = {
            let mut calls = self.calls_by_path.lock().await;
            let count = calls.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }

        if let Some((times, kind)) = Self::lookup(&self.failures, &key) {
            if call_number <= *times {
                warn!("Mock captioner failing {} (call {})", key, call_number);
                return Err(CaptionError::new(&key, kind.clone()));
            }
        }

        if let Some(description) = Self::lookup(&self.descriptions, &key) {
            return Ok(description.clone());
        }

        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        info!("Mock captioner describing {}", key);
        Ok(format!("an image named {}", stem))
    }
}
