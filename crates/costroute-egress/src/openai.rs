//! OpenAI-compatible egress connector
//!
//! Speaks the `chat/completions` wire format, which Mistral and DeepSeek
//! expose as well. Only a single user turn (plus an optional system prompt)
//! is ever sent.

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

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const MISTRAL_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";

/// OpenAI-compatible connector configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Full URL of the chat completions endpoint
    pub endpoint: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Optional system message placed before the prompt
    pub system_prompt: Option<String>,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl OpenAICompatConfig {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            system_prompt: None,
            client_config: HttpClientConfig::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.client_config.max_retries = max_retries;
        self
    }
}

/// OpenAI-compatible connector
pub struct OpenAICompatConnector {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatConnector {
    pub fn new(config: OpenAICompatConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(EgressError::ConfigError("endpoint must not be empty".to_string()));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OpenAICompatConfig {
        &self.config
    }

    fn build_request<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    /// Send the request, retrying transient failures
    pub async fn send(&self, request: &GenerationRequest, timeout: Duration) -> Result<Completion> {
        let body = self.build_request(request);
        let body = &body;

        let response = with_retry(self.config.client_config.max_retries, || async move {
            let response = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(&self.config.api_key)
                .timeout(timeout)
                .json(body)
                .send()
                .await?;

            debug!(status = %response.status(), "Chat completion response");

            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }

            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| EgressError::ParseError(format!("Failed to parse chat completion: {}", e)))
        })
        .await?;

        from_chat_response(response)
    }
}

#[async_trait]
impl Provider for OpenAICompatConnector {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn complete(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> std::result::Result<Completion, ProviderError> {
        debug!("Sending chat completion request");
        self.send(request, timeout).await.map_err(ProviderError::from)
    }
}

fn from_chat_response(response: ChatResponse) -> Result<Completion> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| EgressError::ParseError("response contained no choices".to_string()))?;

    // Cost is charged on reported tokens, so an answer without them is unusable
    let usage = response
        .usage
        .ok_or_else(|| EgressError::ParseError("response carried no usage block".to_string()))?;

    Ok(Completion {
        text,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
