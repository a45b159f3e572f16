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

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use dirs::home_dir;
use crate::audio::ChunkConfig;

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: String,
    pub embedding_provider: String,
    pub openai: OpenAiSettings,
    pub ollama: OllamaSettings,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub vector_store_path: PathBuf,
    pub summarization_interval_secs: u64,
    pub audio: ChunkConfig,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let llm_provider = env::var("RECOLLECT_LLM_PROVIDER")
            .unwrap_or_else(|_| "ollama".to_string());

        let embedding_provider = env::var("RECOLLECT_EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "ollama".to_string());

        let openai = OpenAiSettings {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: env::var("OPENAI_TEMPERATURE")
                .unwrap_or_else(|_| "0.3".to_string())
                .parse::<f32>()
                .unwrap_or(0.3),
        };

        let ollama = OllamaSettings {
            base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: env::var("OLLAMA_MODEL")
                .unwrap_or_else(|_| "llama3.1:8b".to_string()),
            embedding_model: env::var("OLLAMA_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            timeout_seconds: env::var("OLLAMA_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60),
        };

        let data_dir = env::var("RECOLLECT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                home_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".recollect")
            });

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        let database_path = env::var("RECOLLECT_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("recollect.db"));

        let vector_store_path = env::var("RECOLLECT_VECTOR_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("vectors.bin"));

        let summarization_interval_secs = env::var("SUMMARIZATION_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .unwrap_or(60);

        let audio = ChunkConfig {
            chunk_duration: env::var("AUDIO_CHUNK_DURATION")
                .unwrap_or_else(|_| "3.0".to_string())
                .parse::<f64>()
                .unwrap_or(3.0),
            sample_rate: env::var("AUDIO_SAMPLE_RATE")
                .unwrap_or_else(|_| "16000".to_string())
                .parse::<u32>()
                .unwrap_or(16000),
            sample_width: env::var("AUDIO_SAMPLE_WIDTH")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u16>()
                .unwrap_or(2),
            channels: env::var("AUDIO_CHANNELS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<u16>()
                .unwrap_or(1),
            overlap_duration: env::var("AUDIO_OVERLAP_DURATION")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse::<f64>()
                .unwrap_or(0.5),
        };

        Ok(Settings {
            llm_provider,
            embedding_provider,
            openai,
            ollama,
            data_dir,
            database_path,
            vector_store_path,
            summarization_interval_secs,
            audio,
        })
    }
}
