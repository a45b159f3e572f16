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

use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::estimate_tokens;
use crate::error::PipelineError;
use crate::llm::{
    json_string, json_string_list, parse_llm_json, with_transport_retry, LanguageModel,
    LlmOptions,
};
use crate::types::{HourSummary, TopicSegment};

const TEN_MINUTE_SYSTEM_PROMPT: &str = "You are a transcription summarizer. \
Integrate the following one-minute summaries into a single cohesive 10-minute summary.\n\n\
Rules:\n\
- Output ONLY valid JSON, no markdown fences or extra text.\n\
- Format: {\"summary\": \"...\", \"keywords\": [...], \"topics\": [...]}\n\
- summary: A concise paragraph capturing the key content (max 150 tokens).\n\
- keywords: 3-8 important terms or phrases from the summaries.\n\
- topics: short labels for distinct topics discussed.\n\
- Preserve the original language of the summaries.";

const HOUR_SYSTEM_PROMPT: &str = "You are a transcription summarizer. \
Integrate the following 10-minute summaries into a single cohesive 1-hour summary.\n\n\
Rules:\n\
- Output ONLY valid JSON, no markdown fences or extra text.\n\
- Format: {\"summary\": \"...\", \"keywords\": [...], \
\"topic_segments\": [{\"topic\": \"...\", \"minutes\": \"0-10\"}]}\n\
- summary: A comprehensive paragraph capturing the key content (max 300 tokens).\n\
- keywords: 5-10 important terms or phrases.\n\
- topic_segments: list of topic labels with their minute ranges.\n\
- Preserve the original language of the summaries.";

/// Minute summaries per Level-1 chunk.
const CHUNK_SPAN: usize = 10;

/// Bound on concurrent Level-1 LM calls.
const LEVEL_ONE_CONCURRENCY: usize = 3;

/// Produces hour-level summaries via two-level hierarchical compression:
/// up to 60 one-minute summaries → ≤6 ten-minute reductions (bounded
/// parallel fan-out) → one hour summary.
pub struct HourSummarizer {
    llm: Arc<dyn LanguageModel>,
    semaphore: Arc<Semaphore>,
}

impl HourSummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            semaphore: Arc::new(Semaphore::new(LEVEL_ONE_CONCURRENCY)),
        }
    }

    async fn call_llm_limited(&self, prompt: String) -> Result<String, PipelineError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Summarization("semaphore closed".to_string()))?;
        let options = LlmOptions::default();
        let result = with_transport_retry(|| self.llm.generate(&prompt, &options))
            .await
            .map_err(|err| PipelineError::Summarization(err.to_string()));
        drop(permit);
        result
    }

    /// Summarize one chunk of up to ten one-minute summaries.
    async fn summarize_ten_minutes(
        &self,
        chunk: &[String],
        chunk_index: usize,
    ) -> Result<String, PipelineError> {
        let numbered = chunk
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[Minute {}] {s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let full_prompt = format!(
            "{TEN_MINUTE_SYSTEM_PROMPT}\n\nOne-minute summaries to integrate:\n{numbered}"
        );

        let raw = self.call_llm_limited(full_prompt).await.map_err(|err| {
            PipelineError::Summarization(format!(
                "LM call failed for 10-min chunk {chunk_index}: {err}"
            ))
        })?;

        let data = parse_llm_json(&raw).map_err(|err| {
            PipelineError::Summarization(format!(
                "invalid JSON from LM for 10-min chunk {chunk_index}: {err}"
            ))
        })?;

        Ok(json_string(&data, "summary"))
    }

    /// Produce an hour-level summary from one hour bucket of minute
    /// summaries.
    ///
    /// An empty input returns an empty result with no LM calls. Any LM or
    /// JSON failure at either level fails the whole hour.
    pub async fn summarize_hour(
        &self,
        recording_id: i64,
        hour_index: u32,
        minute_summaries: &[String],
    ) -> Result<HourSummary, PipelineError> {
        if minute_summaries.is_empty() {
            return Ok(HourSummary {
                hour_index,
                ..Default::default()
            });
        }

        let input_tokens: usize = minute_summaries.iter().map(|s| estimate_tokens(s)).sum();

        // Level 1: partition into 10-minute chunks. A single-chunk partition
        // skips the intermediate reduction entirely.
        let chunks: Vec<&[String]> = minute_summaries.chunks(CHUNK_SPAN).collect();

        let ten_min_texts: Vec<String> = if chunks.len() == 1 {
            minute_summaries.to_vec()
        } else {
            try_join_all(
                chunks
                    .iter()
                    .enumerate()
                    .map(|(idx, chunk)| self.summarize_ten_minutes(chunk, idx)),
            )
            .await?
        };

        // Level 2: reduce the ordered chunk outputs into the hour summary.
        let numbered = ten_min_texts
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[Minutes {}-{}] {s}", i * CHUNK_SPAN, (i + 1) * CHUNK_SPAN))
            .collect::<Vec<_>>()
            .join("\n");
        let full_prompt =
            format!("{HOUR_SYSTEM_PROMPT}\n\nTen-minute summaries to integrate:\n{numbered}");

        let raw = self.call_llm_limited(full_prompt).await.map_err(|err| {
            PipelineError::Summarization(format!(
                "LM call failed for hour {hour_index} of recording {recording_id}: {err}"
            ))
        })?;

        let data = parse_llm_json(&raw).map_err(|err| {
            PipelineError::Summarization(format!(
                "invalid JSON from LM for hour {hour_index}: {err}"
            ))
        })?;

        let summary_text = json_string(&data, "summary");
        let output_tokens = estimate_tokens(&summary_text);

        tracing::info!(
            "hour {} summary: {} input tokens -> {} output tokens",
            hour_index,
            input_tokens,
            output_tokens,
        );

        Ok(HourSummary {
            hour_index,
            summary_text,
            keywords: json_string_list(&data, "keywords"),
            topic_segments: parse_topic_segments(&data),
            token_count: output_tokens,
            model_used: self.llm.model().to_string(),
        })
    }
}

fn parse_topic_segments(data: &Value) -> Vec<TopicSegment> {
    data.get("topic_segments")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock that tracks total calls and the high-water mark of concurrent
    /// calls in flight.
    struct GaugeLm {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        response: String,
    }

    impl GaugeLm {
        fn new(response: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                response: response.to_string(),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for GaugeLm {
        fn model(&self) -> &str {
            "gauge"
        }

        async fn generate(&self, _prompt: &str, _options: &LlmOptions) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    const LEVEL_RESPONSE: &str = r#"{"summary": "chunk summary", "keywords": ["k"],
        "topic_segments": [{"topic": "intro", "minutes": "0-10"}]}"#;

    fn minutes(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("minute summary {i}")).collect()
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let llm = Arc::new(GaugeLm::new(LEVEL_RESPONSE));
        let summarizer = HourSummarizer::new(llm.clone());

        let result = summarizer.summarize_hour(1, 2, &[]).await.unwrap();
        assert_eq!(result.hour_index, 2);
        assert_eq!(result.token_count, 0);
        assert!(result.summary_text.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_chunk_skips_level_one() {
        let llm = Arc::new(GaugeLm::new(LEVEL_RESPONSE));
        let summarizer = HourSummarizer::new(llm.clone());

        let result = summarizer.summarize_hour(1, 0, &minutes(10)).await.unwrap();
        // Exactly one call: the Level-2 reduce over the verbatim inputs.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.summary_text, "chunk summary");
        assert_eq!(result.topic_segments.len(), 1);
        assert_eq!(result.token_count, estimate_tokens("chunk summary"));
        assert_eq!(result.model_used, "gauge");
    }

    #[tokio::test]
    async fn multi_chunk_runs_level_one_per_chunk() {
        let llm = Arc::new(GaugeLm::new(LEVEL_RESPONSE));
        let summarizer = HourSummarizer::new(llm.clone());

        // 25 minutes -> chunks of 10, 10, 5 -> 3 Level-1 calls + 1 reduce.
        summarizer.summarize_hour(1, 0, &minutes(25)).await.unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn level_one_fanout_is_bounded_by_three() {
        let llm = Arc::new(GaugeLm::new(LEVEL_RESPONSE));
        let summarizer = HourSummarizer::new(llm.clone());

        // 60 minutes -> 6 chunks launched together.
        summarizer.summarize_hour(1, 0, &minutes(60)).await.unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 7);
        assert!(llm.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn invalid_json_fails_the_whole_hour() {
        let llm = Arc::new(GaugeLm::new("no JSON here"));
        let summarizer = HourSummarizer::new(llm);

        let err = summarizer
            .summarize_hour(1, 0, &minutes(12))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Summarization(_)));
    }
}
