//! Text completion providers.
//!
//! The completion service is opaque to the rest of the crate: it takes a
//! system prompt, a user prompt and optionally a JSON schema the reply must
//! follow, and returns the reply text. Callers that request a schema still
//! validate the reply themselves.
//!
//! | Provider | Endpoint | Schema support |
//! |----------|----------|----------------|
//! | `openai` | `POST /v1/chat/completions` | `response_format: json_schema` (strict) |
//! | `ollama` | `POST {url}/api/chat` | `format: <schema>` |
//! | `disabled` | — | always errors |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::http::post_json_with_retry;

/// A single completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Name and JSON schema the reply must conform to.
    pub json_schema: Option<(String, Value)>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.json_schema = Some((name.into(), schema));
        self
    }

    fn messages(&self) -> Vec<Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": self.prompt }));
        messages
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

pub fn create_completion_service(config: &CompletionConfig) -> Result<Box<dyn CompletionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" => Ok(Box::new(OpenAICompletion::new(config)?)),
        "ollama" => Ok(Box::new(OllamaCompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

// ============ OpenAI ============

pub struct OpenAICompletion {
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": request.messages(),
        });
        if let Some((name, schema)) = &request.json_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true }
            });
        }

        let json = post_json_with_retry(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_reply(&json)
    }
}

fn parse_openai_reply(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

pub struct OllamaCompletion {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "stream": false,
            "messages": request.messages(),
            "options": { "temperature": self.temperature },
        });
        if let Some((_, schema)) = &request.json_schema {
            body["format"] = schema.clone();
        }

        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_reply(&json)
    }
}

fn parse_ollama_reply(json: &Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}
