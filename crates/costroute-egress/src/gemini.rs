//! Google Gemini egress connector

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client, error_from_response, with_retry},
};
use async_trait::async_trait;
use costroute_core::{Completion, GenerationRequest, Provider, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini connector configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header
    pub api_key: String,

    /// API root, `{base_url}/models/{model}:generateContent` is called
    pub base_url: String,

    pub model: String,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            client_config: HttpClientConfig::default(),
        }
    }

    /// Set the base URL (for proxies and tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.client_config.max_retries = max_retries;
        self
    }
}

/// Gemini connector
pub struct GeminiConnector {
    config: GeminiConfig,
    client: Client,
    url: String,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(EgressError::ConfigError("model must not be empty".to_string()));
        }
        let client = create_client(&config.client_config)?;
        let url = format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            config,
            client,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the request, retrying transient failures
    pub async fn send(&self, request: &GenerationRequest, timeout: Duration) -> Result<Completion> {
        let body = to_gemini_request(request);
        let body = &body;

        let response = with_retry(self.config.client_config.max_retries, || async move {
            let response = self
                .client
                .post(&self.url)
                .header("x-goog-api-key", &self.config.api_key)
                .timeout(timeout)
                .json(body)
                .send()
                .await?;

            debug!(status = %response.status(), "Gemini response");

            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }

            response
                .json::<GenerateContentResponse>()
                .await
                .map_err(|e| EgressError::ParseError(format!("Failed to parse Gemini response: {}", e)))
        })
        .await?;

        from_gemini_response(response)
    }
}

#[async_trait]
impl Provider for GeminiConnector {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn complete(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> std::result::Result<Completion, ProviderError> {
        debug!("Sending generateContent request");
        self.send(request, timeout).await.map_err(ProviderError::from)
    }
}

fn to_gemini_request(request: &GenerationRequest) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![Part {
                text: &request.prompt,
            }],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        },
    }
}

fn from_gemini_response(response: GenerateContentResponse) -> Result<Completion> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| EgressError::ParseError("response contained no candidates".to_string()))?;

    // Multi-part candidates are concatenated
    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let usage = response
        .usage_metadata
        .ok_or_else(|| EgressError::ParseError("response carried no usageMetadata".to_string()))?;

    Ok(Completion {
        text,
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}
