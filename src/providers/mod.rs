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

pub mod ollama;
pub mod openai;

pub use ollama::{OllamaClient, OllamaEmbedding};
pub use openai::OpenAiClient;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::PipelineError;
use crate::llm::{EmbeddingProvider, LanguageModel, LlmError};

/// Build the configured language-model provider.
pub fn create_language_model(
    settings: &Settings,
) -> Result<Arc<dyn LanguageModel>, PipelineError> {
    let provider: Arc<dyn LanguageModel> = match settings.llm_provider.as_str() {
        "openai" => Arc::new(OpenAiClient::new(&settings.openai).map_err(provider_error)?),
        "ollama" => Arc::new(OllamaClient::new(&settings.ollama).map_err(provider_error)?),
        other => {
            return Err(PipelineError::Summarization(format!(
                "unknown LLM provider: {other}"
            )))
        }
    };
    Ok(provider)
}

/// Build the configured embedding provider.
pub fn create_embedding(
    settings: &Settings,
) -> Result<Arc<dyn EmbeddingProvider>, PipelineError> {
    let provider: Arc<dyn EmbeddingProvider> = match settings.embedding_provider.as_str() {
        "ollama" => Arc::new(OllamaEmbedding::new(&settings.ollama).map_err(embedding_error)?),
        other => {
            return Err(PipelineError::Retrieval(format!(
                "unknown embedding provider: {other}"
            )))
        }
    };
    Ok(provider)
}

fn provider_error(err: LlmError) -> PipelineError {
    PipelineError::Summarization(err.to_string())
}

fn embedding_error(err: LlmError) -> PipelineError {
    PipelineError::Retrieval(err.to_string())
}
