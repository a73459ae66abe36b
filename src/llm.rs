use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, EmbeddingProvider, GeminiConfig};

/// Dimension of the `highlights.embedding` column.
pub const EMBEDDING_DIM: usize = 768;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ── Error type ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("GOOGLE_API_KEY is not set")]
    MissingApiKey,
    #[error("Ollama is not running at {0}. Start it with: ollama serve")]
    OllamaUnavailable(String),
    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("model returned no text")]
    EmptyResponse,
    #[error("expected 768-dimensional embedding, got {0}")]
    Dimension(usize),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            LlmError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Run `call` up to `attempts` times, backing off exponentially between
/// transient failures.
pub async fn with_retry<T, F, Fut>(what: &str, attempts: u32, mut call: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_transient() => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                warn!("{what} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status { status, body })
}

fn check_dimension(values: Vec<f32>) -> Result<Vec<f32>, LlmError> {
    if values.len() == EMBEDDING_DIM {
        Ok(values)
    } else {
        Err(LlmError::Dimension(values.len()))
    }
}

// ── Seams ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Same as `generate` for backends without a JSON response mode.
    async fn generate_json(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate(prompt).await
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding for stored content (highlight descriptions).
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, LlmError>;
    /// Embedding for a search question.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

// ── Gemini ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    #[serde(rename = "taskType")]
    task_type: TaskType,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Client for the Gemini REST API (text, vision and embeddings).
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_generate(&self, body: &GenerateRequest<'_>) -> Result<String, LlmError> {
        let url = &self.url(&format!("models/{}:generateContent", self.config.model));
        with_retry("gemini generateContent", self.config.max_retries, || async move {
            let resp = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(body)
                .send()
                .await?;
            let parsed: GenerateResponse = check_status(resp).await?.json().await?;
            parsed.text().ok_or(LlmError::EmptyResponse)
        })
        .await
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::Text { text: prompt }],
            }],
            generation_config: None,
        };
        self.post_generate(&body).await
    }

    /// Like `generate_text` but asks for an `application/json` reply.
    pub async fn generate_json(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part::Text { text: prompt }],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };
        self.post_generate(&body).await
    }

    /// Send a JPEG together with a prompt to the vision model.
    pub async fn generate_with_image(&self, prompt: &str, jpeg: &[u8]) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: general_purpose::STANDARD.encode(jpeg),
                        },
                    },
                ],
            }],
            generation_config: None,
        };
        self.post_generate(&body).await
    }

    pub async fn embed(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>, LlmError> {
        let model = self.config.embedding_model.trim_start_matches("models/");
        let url = self.url(&format!("models/{model}:embedContent"));
        let body = EmbedContentRequest {
            model: format!("models/{model}"),
            content: Content {
                parts: vec![Part::Text { text }],
            },
            task_type,
            output_dimensionality: EMBEDDING_DIM,
        };

        let (url, body) = (&url, &body);
        let values = with_retry("gemini embedContent", self.config.max_retries, || async move {
            let resp = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(body)
                .send()
                .await?;
            let parsed: EmbedContentResponse = check_status(resp).await?.json().await?;
            Ok(parsed.embedding.values)
        })
        .await?;

        debug!(dims = values.len(), "gemini embedding received");
        check_dimension(values)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let url = &self.url("models");
        with_retry("gemini list models", self.config.max_retries, || async move {
            let resp = self
                .http
                .get(url)
                .header("x-goog-api-key", &self.config.api_key)
                .query(&[("pageSize", "1000")])
                .send()
                .await?;
            let parsed: ListModelsResponse = check_status(resp).await?.json().await?;
            Ok(parsed.models)
        })
        .await
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_text(prompt).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<String, LlmError> {
        GeminiClient::generate_json(self, prompt).await
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed(text, TaskType::RetrievalQuery).await
    }
}

// ── Ollama embeddings ───────────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Local embeddings served by Ollama (`nomic-embed-text` is 768-dimensional).
#[derive(Clone)]
pub struct OllamaEmbedder {
    http: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: &str, max_retries: u32) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            model: model.to_string(),
            max_retries,
        })
    }

    pub async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = OllamaEmbedRequest {
            model: &self.model,
            input: texts.to_vec(),
        };

        let body = &body;
        let parsed: OllamaEmbedResponse = with_retry("ollama embed", self.max_retries, || async move {
            let resp = self.http.post(&self.url).json(body).send().await.map_err(|e| {
                if e.is_connect() {
                    LlmError::OllamaUnavailable(self.url.clone())
                } else {
                    LlmError::Http(e)
                }
            })?;
            Ok(check_status(resp).await?.json().await?)
        })
        .await?;

        if parsed.embeddings.len() != texts.len() {
            return Err(LlmError::Status {
                status: reqwest::StatusCode::OK,
                body: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            });
        }

        parsed.embeddings.into_iter().map(check_dimension).collect()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_texts(&[text])
            .await?
            .pop()
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_one(text).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_one(text).await
    }
}

/// Build the configured embedding backend.
pub fn embedder(
    embedding: &EmbeddingConfig,
    gemini: &GeminiConfig,
) -> Result<std::sync::Arc<dyn Embedder>, LlmError> {
    Ok(match embedding.provider {
        EmbeddingProvider::Gemini => std::sync::Arc::new(GeminiClient::new(gemini.clone())?),
        EmbeddingProvider::Ollama => std::sync::Arc::new(OllamaEmbedder::new(
            &embedding.ollama_url,
            &embedding.ollama_model,
            gemini.max_retries,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> LlmError {
        LlmError::Status {
            status: reqwest::StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry("test", 3, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(status(503))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry("test", 2, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status(429))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry("test", 5, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status(400))
        })
        .await;
        assert!(matches!(result, Err(LlmError::Status { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn embedding_dimension_is_enforced() {
        assert!(check_dimension(vec![0.0; EMBEDDING_DIM]).is_ok());
        assert!(matches!(
            check_dimension(vec![0.0; 384]),
            Err(LlmError::Dimension(384))
        ));
    }

    #[test]
    fn generate_response_joins_parts() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world "}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("Hello world"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(empty.text(), None);
    }

    #[test]
    fn requests_serialize_in_gemini_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "hi" },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: "AAAA".into(),
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(
            value["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");

        let embed = EmbedContentRequest {
            model: "models/text-embedding-004".into(),
            content: Content {
                parts: vec![Part::Text { text: "q" }],
            },
            task_type: TaskType::RetrievalQuery,
            output_dimensionality: EMBEDDING_DIM,
        };
        let value = serde_json::to_value(&embed).unwrap();
        assert_eq!(value["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(value["outputDimensionality"], 768);
    }

    #[test]
    fn gemini_requires_an_api_key() {
        let config = GeminiConfig {
            api_key: "  ".into(),
            base_url: "http://localhost".into(),
            model: "m".into(),
            embedding_model: "e".into(),
            max_retries: 1,
            max_concurrency: 1,
        };
        assert!(matches!(GeminiClient::new(config), Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn model_list_parses_camel_case() {
        let json = r#"{"models":[{"name":"models/gemini-2.0-flash","displayName":"Gemini 2.0 Flash",
            "supportedGenerationMethods":["generateContent","countTokens"]}]}"#;
        let parsed: ListModelsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.models[0].display_name, "Gemini 2.0 Flash");
        assert_eq!(parsed.models[0].supported_generation_methods.len(), 2);
        assert_eq!(parsed.models[0].description, "");
    }
}
