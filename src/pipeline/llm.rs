//! LLM gateway: a single opaque request/response seam.
//!
//! The pipeline treats the language model as a black-box text-completion
//! service: one system prompt, one user prompt, one text response. No
//! streaming, no caching of identical prompts, no retries at this layer —
//! retry policy belongs to the retry controller, and only on the extraction
//! path.
//!
//! [`HttpLlmGateway`] speaks the OpenAI-compatible chat-completions wire
//! format, which also covers the self-hosted inference servers used in
//! development. Tests inject their own [`LlmGateway`] implementation, so
//! nothing in the pipeline is coupled to the HTTP shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Per-call completion options.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4_096,
            temperature: 0.1,
        }
    }
}

/// Errors from a gateway call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Could not reach the endpoint (DNS, TLS, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success status.
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// No API key available in the environment.
    #[error("no LLM credentials: set {var}")]
    MissingCredentials { var: &'static str },

    /// The endpoint returned a structurally valid but empty response.
    #[error("empty completion response")]
    EmptyResponse,
}

impl From<LlmError> for crate::error::PipelineError {
    fn from(e: LlmError) -> Self {
        crate::error::PipelineError::Llm {
            detail: e.to_string(),
        }
    }
}

/// A hosted language model, reduced to one call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Send a system+user prompt pair and return the raw text response.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

// ── OpenAI-compatible wire types ─────────────────────────────────────────

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
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Production gateway over an OpenAI-compatible chat-completions endpoint.
pub struct HttpLlmGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

/// Env var holding the API key; `OPENAI_API_KEY` is accepted as a fallback.
pub const API_KEY_VAR: &str = "PAPER2DATA_LLM_API_KEY";
/// Env var overriding the completions base URL.
pub const BASE_URL_VAR: &str = "PAPER2DATA_LLM_BASE_URL";
/// Env var overriding the model id.
pub const MODEL_VAR: &str = "PAPER2DATA_LLM_MODEL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

impl HttpLlmGateway {
    /// Construct a gateway against an explicit endpoint.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        // Extraction of a dense table can take minutes on slow models; the
        // hosting platform's own request timeout is the real ceiling.
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    /// Resolve the gateway from the environment, at call time.
    ///
    /// The fallback chain mirrors how deployments configure it:
    /// 1. `PAPER2DATA_LLM_API_KEY` (+ optional base URL / model overrides)
    /// 2. `OPENAI_API_KEY` against the default OpenAI endpoint
    ///
    /// A local endpoint (`PAPER2DATA_LLM_BASE_URL` pointing at an inference
    /// server) works without any key.
    pub fn from_env(model_override: Option<&str>) -> Result<Self, LlmError> {
        let base_url =
            std::env::var(BASE_URL_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let key = std::env::var(API_KEY_VAR)
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        if key.is_none() && base_url == DEFAULT_BASE_URL {
            return Err(LlmError::MissingCredentials { var: API_KEY_VAR });
        }
        let model = model_override
            .map(str::to_string)
            .or_else(|| std::env::var(MODEL_VAR).ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self::new(base_url, key, model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            "LLM call: model={}, system={}B, user={}B",
            self.model,
            system.len(),
            user.len()
        );

        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Connection(format!("response decode: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Gateway that resolves credentials from the environment on every call.
///
/// Lets the server start without any LLM configuration: a route that needs
/// the model fails at call time with a descriptive credentials error, and
/// setting the variable fixes the next request without a restart.
pub struct EnvLlmGateway {
    model: Option<String>,
}

impl EnvLlmGateway {
    pub fn new(model: Option<String>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl LlmGateway for EnvLlmGateway {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        opts: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let gateway = HttpLlmGateway::from_env(self.model.as_deref())?;
        gateway.complete(system, user, opts).await
    }
}
