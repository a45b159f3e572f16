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
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OllamaSettings;
use crate::llm::{EmbeddingProvider, LanguageModel, LlmError, LlmOptions};

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: OllamaModelOptions,
}

#[derive(Debug, Serialize)]
struct OllamaModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Local Ollama LM provider speaking `/api/generate`.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(settings: &OllamaSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &LlmOptions) -> Result<String, LlmError> {
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: options.system.clone(),
            stream: false,
            options: OllamaModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens.map(|t| t as i32),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(LlmError::Provider(format!(
                "Ollama API error: {}",
                response.status()
            )));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse Ollama response: {e}")))?;

        Ok(body.response)
    }
}

/// Known embedding dimensions for common Ollama embedding models.
const KNOWN_DIMENSIONS: &[(&str, usize)] = &[
    ("nomic-embed-text", 768),
    ("mxbai-embed-large", 1024),
    ("all-minilm", 384),
];

const DEFAULT_DIMENSION: usize = 768;

/// Ollama embedding provider speaking `/api/embeddings`.
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedding {
    pub fn new(settings: &OllamaSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(LlmError::Provider(format!(
                "Ollama embeddings API error: {}",
                response.status()
            )));
        }

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse embedding: {e}")))?;

        Ok(body.embedding)
    }

    fn dimension(&self) -> usize {
        KNOWN_DIMENSIONS
            .iter()
            .find(|(name, _)| *name == self.model)
            .map(|(_, dim)| *dim)
            .unwrap_or(DEFAULT_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(base_url: String) -> OllamaSettings {
        OllamaSettings {
            base_url,
            model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn generate_returns_response_field() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"model": "llama3.1:8b", "response": "generated text", "done": true}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&test_settings(server.url())).unwrap();
        let text = client
            .generate("prompt", &LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "generated text");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(r#"{"embedding": [0.1, 0.2, 0.3]}"#)
            .create_async()
            .await;

        let embedding = OllamaEmbedding::new(&test_settings(server.url())).unwrap();
        let vector = embedding.embed("text").await.unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(embedding.dimension(), 768);
    }

    #[tokio::test]
    async fn server_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .with_status(500)
            .create_async()
            .await;

        let client = OllamaClient::new(&test_settings(server.url())).unwrap();
        let err = client
            .generate("prompt", &LlmOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider(_)));
    }
}
