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

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Active,
    Processing,
    Completed,
    Failed,
    Imported,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Active => "active",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Imported => "imported",
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An STT mishearing the summarizer corrected using domain context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionCorrection {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub reason: String,
}

/// Structured output of the minute summarizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinuteSummary {
    pub minute_index: u32,
    pub summary_text: String,
    pub keywords: Vec<String>,
    pub topic: String,
    pub corrections: Vec<TranscriptionCorrection>,
}

impl MinuteSummary {
    /// Zero-valued result for an empty transcript (no LM call performed).
    pub fn empty(minute_index: u32) -> Self {
        Self {
            minute_index,
            ..Default::default()
        }
    }
}

/// One topic span inside an hour summary, e.g. `{"topic": "...", "minutes": "0-10"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicSegment {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub minutes: String,
}

/// Output of the hierarchical hour summarizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourSummary {
    pub hour_index: u32,
    pub summary_text: String,
    pub keywords: Vec<String>,
    pub topic_segments: Vec<TopicSegment>,
    pub token_count: usize,
    pub model_used: String,
}

/// Unified re-summarization of an arbitrary inclusive minute range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSummary {
    pub recording_id: i64,
    pub start_minute: u32,
    pub end_minute: u32,
    pub summary_text: String,
    pub keywords: Vec<String>,
    pub included_minutes: Vec<u32>,
    pub source_count: usize,
    pub model_used: String,
}

/// Zero-shot classification of a recording's combined summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    pub reason: String,
}

/// A natural-language query over past recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.3
}

impl RagQueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            date_from: None,
            date_to: None,
            category: None,
            keywords: Vec::new(),
        }
    }
}

/// A retrieved vector document paired with its similarity and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSource {
    pub recording_id: i64,
    pub minute_index: u32,
    pub summary_text: String,
    pub similarity: f64,
    pub date: String,
    pub category: String,
}

/// Grounded answer plus the sources it cites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryResponse {
    pub answer: String,
    pub sources: Vec<RagSource>,
    pub model_used: String,
    pub query_time_ms: u64,
}

/// One timed span within a transcription result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// Result of transcribing a persisted audio file or a buffered chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileTranscription {
    pub text: String,
    pub language: String,
    pub confidence: f64,
    pub duration: f64,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
}

/// One emitted result from the streaming transcription driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingTranscription {
    pub id: Uuid,
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
}
