/*
 * Recollect CLI - Rust Edition
 * Copyright (c) 2025 Recollect Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Provider-level errors. Only transport failures are retryable.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transport(_))
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            LlmError::Transport(err.to_string())
        } else {
            LlmError::Provider(err.to_string())
        }
    }
}

/// Generation options accepted by every provider.
#[derive(Debug, Clone, Default)]
pub struct LlmOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

const SUMMARIZE_DIRECTIVE: &str = "You are a concise summarizer. \
     Output ONLY valid JSON with keys: summary, keywords, topic. \
     No markdown fences or extra text.";

const CLASSIFY_DIRECTIVE: &str = "You are a text classifier. \
     Output ONLY valid JSON with keys: category, confidence, reason. \
     No markdown fences or extra text.";

/// A language-model provider.
///
/// All three operations return raw strings, possibly wrapped in markdown code
/// fences; callers strip fences before parsing.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, reported on persisted artifacts for observability.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &LlmOptions) -> Result<String, LlmError>;

    /// Produce a JSON summary of the given text.
    async fn summarize(&self, text: &str, options: &LlmOptions) -> Result<String, LlmError> {
        let opts = LlmOptions {
            system: Some(SUMMARIZE_DIRECTIVE.to_string()),
            temperature: options.temperature.or(Some(0.3)),
            max_tokens: options.max_tokens,
        };
        self.generate(&format!("Summarize the following text:\n\n{text}"), &opts)
            .await
    }

    /// Classify text into one of the provided categories.
    async fn classify(
        &self,
        text: &str,
        categories: &[String],
        options: &LlmOptions,
    ) -> Result<String, LlmError> {
        let opts = LlmOptions {
            system: Some(CLASSIFY_DIRECTIVE.to_string()),
            temperature: options.temperature.or(Some(0.1)),
            max_tokens: options.max_tokens,
        };
        let prompt = format!(
            "Classify the following text into one of these categories: {}\n\nText:\n{}",
            categories.join(", "),
            text
        );
        self.generate(&prompt, &opts).await
    }
}

/// A text-embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize;
}

const MAX_ATTEMPTS: u32 = 2;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Call an LM operation, retrying transport failures with exponential backoff.
///
/// Two attempts total. Non-transport errors are returned immediately.
pub async fn with_transport_retry<F, Fut>(mut call: F) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let mut delay = BACKOFF_BASE;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(text) => return Ok(text),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    "transient LM failure (attempt {attempt}/{MAX_ATTEMPTS}), retrying in {delay:?}: {err}"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
            Err(err) => return Err(err),
        }
    }
}

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"^```[A-Za-z0-9_-]*\n?").unwrap();
    static ref FENCE_CLOSE: Regex = Regex::new(r"\n?```$").unwrap();
}

/// Remove one leading/trailing markdown code fence (with optional language
/// tag) wrapping an LM response. Idempotent.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let opened = FENCE_OPEN.replace(trimmed, "");
    let closed = FENCE_CLOSE.replace(&opened, "");
    closed.trim().to_string()
}

/// Strip fences and parse an LM response as JSON.
pub fn parse_llm_json(raw: &str) -> Result<Value, LlmError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|_| {
        let preview: String = cleaned.chars().take(200).collect();
        LlmError::InvalidResponse(format!("invalid JSON from model: {preview}"))
    })
}

/// Lenient string extraction: strings pass through, other non-null scalars
/// are stringified, null/missing become empty.
pub fn json_string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Lenient list-of-strings extraction: non-string items are dropped.
pub fn json_string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Confidence extraction: non-finite and non-numeric values coerce to 0,
/// then the result is clamped to [0, 1].
pub fn json_confidence(value: &Value, key: &str) -> f64 {
    let raw = value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
