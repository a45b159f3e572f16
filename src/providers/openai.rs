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
use serde_json::{json, Value};

use crate::config::OpenAiSettings;
use crate::llm::{LanguageModel, LlmError, LlmOptions};

/// OpenAI-compatible chat-completions provider.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, LlmError> {
        if settings.api_key.is_empty() {
            return Err(LlmError::Provider(
                "OPENAI_API_KEY is not configured".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &LlmOptions) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut request_body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
            "stream": false
        });
        if let Some(max_tokens) = options.max_tokens {
            request_body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!(
                "OpenAI API error: {status}: {body}"
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = response_json
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| {
                LlmError::InvalidResponse("missing choices[0].message.content".to_string())
            })?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(base_url: String) -> OpenAiSettings {
        OpenAiSettings {
            api_key: "test-key".to_string(),
            base_url,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
        }
    }

    #[test]
    fn requires_api_key() {
        let settings = OpenAiSettings {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
        };
        assert!(OpenAiClient::new(&settings).is_err());
    }

    #[tokio::test]
    async fn extracts_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(&test_settings(server.url())).unwrap();
        let text = client
            .generate("hi", &LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error": "rate limited"}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(&test_settings(server.url())).unwrap();
        let err = client
            .generate("hi", &LlmOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider(_)));
        assert!(!err.is_transient());
    }
}
