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

use serde_json::Value;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::llm::{
    json_string, json_string_list, parse_llm_json, with_transport_retry, LanguageModel,
    LlmOptions,
};
use crate::types::{MinuteSummary, TranscriptionCorrection};

const SYSTEM_PROMPT: &str = "You are a transcription summarizer. \
Given a 1-minute transcript, produce a JSON summary.\n\n\
Rules:\n\
- Output ONLY valid JSON, no markdown fences or extra text.\n\
- Format: {\"summary\": \"...\", \"keywords\": [...], \"topic\": \"...\", \"corrections\": [...]}\n\
- summary: 1-2 concise sentences capturing the key content (max 50 tokens).\n\
- keywords: 2-5 important terms or phrases from the transcript.\n\
- topic: a short label for the main topic (e.g. \"AI lecture\", \"project meeting\").\n\
- corrections: list of STT errors you corrected in the summary. \
Each item: {\"original\": \"...\", \"corrected\": \"...\", \"reason\": \"...\"}. \
If user-provided context is given, use it to identify and fix likely STT \
mishearings (e.g. phonetically similar words in the wrong domain). \
If no corrections were needed, return an empty list.\n\
- Preserve the original language of the transcript.";

fn build_user_prompt(
    transcript: &str,
    previous_context: Option<&str>,
    user_context: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    if let Some(context) = user_context {
        parts.push(format!(
            "User-provided context (use for STT error correction):\n{context}\n"
        ));
    }
    if let Some(previous) = previous_context {
        parts.push(format!("Previous minute summary for context:\n{previous}\n"));
    }
    parts.push(format!("Transcript to summarize:\n{transcript}"));
    parts.join("\n")
}

/// Malformed correction entries (missing original/corrected) are dropped.
fn parse_corrections(data: &Value) -> Vec<TranscriptionCorrection> {
    data.get("corrections")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let original = entry.get("original")?.as_str()?;
                    let corrected = entry.get("corrected")?.as_str()?;
                    Some(TranscriptionCorrection {
                        original: original.to_string(),
                        corrected: corrected.to_string(),
                        reason: json_string(entry, "reason"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Summarizes one-minute transcript segments, seeding continuity with the
/// previous minute's summary.
pub struct MinuteSummarizer {
    llm: Arc<dyn LanguageModel>,
}

impl MinuteSummarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Summarize a one-minute transcript segment.
    ///
    /// Empty or whitespace-only input returns a zero-valued result without
    /// invoking the LM.
    pub async fn summarize_minute(
        &self,
        transcript: &str,
        minute_index: u32,
        previous_context: Option<&str>,
        user_context: Option<&str>,
    ) -> Result<MinuteSummary, PipelineError> {
        if transcript.trim().is_empty() {
            return Ok(MinuteSummary::empty(minute_index));
        }

        let user_prompt = build_user_prompt(transcript, previous_context, user_context);
        let full_prompt = format!("{SYSTEM_PROMPT}\n\n{user_prompt}");
        let options = LlmOptions::default();

        let raw = with_transport_retry(|| self.llm.generate(&full_prompt, &options))
            .await
            .map_err(|err| {
                PipelineError::Summarization(format!(
                    "LM call failed for minute {minute_index}: {err}"
                ))
            })?;

        let data = parse_llm_json(&raw).map_err(|err| {
            PipelineError::Summarization(format!(
                "invalid JSON from LM for minute {minute_index}: {err}"
            ))
        })?;

        Ok(MinuteSummary {
            minute_index,
            summary_text: json_string(&data, "summary"),
            keywords: json_string_list(&data, "keywords"),
            topic: json_string(&data, "topic"),
            corrections: parse_corrections(&data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedLm {
        response: String,
        calls: AtomicUsize,
    }

    impl CannedLm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedLm {
        fn model(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str, _options: &LlmOptions) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn empty_transcript_skips_the_lm() {
        let llm = Arc::new(CannedLm::new("should never be used"));
        let summarizer = MinuteSummarizer::new(llm.clone());

        let result = summarizer
            .summarize_minute("   \n\t", 7, None, None)
            .await
            .unwrap();

        assert_eq!(result.minute_index, 7);
        assert!(result.summary_text.is_empty());
        assert!(result.keywords.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parses_fenced_json_response() {
        let llm = Arc::new(CannedLm::new(
            "```json\n{\"summary\": \"Covered transformers.\", \"keywords\": [\"transformers\"], \
             \"topic\": \"AI lecture\", \"corrections\": []}\n```",
        ));
        let summarizer = MinuteSummarizer::new(llm);

        let result = summarizer
            .summarize_minute("Today we covered transformers.", 0, None, None)
            .await
            .unwrap();

        assert_eq!(result.summary_text, "Covered transformers.");
        assert_eq!(result.keywords, vec!["transformers"]);
        assert_eq!(result.topic, "AI lecture");
    }

    #[tokio::test]
    async fn malformed_corrections_are_dropped() {
        let llm = Arc::new(CannedLm::new(
            r#"{"summary": "s", "keywords": [], "topic": "t", "corrections": [
                {"original": "tensor flow", "corrected": "TensorFlow", "reason": "domain"},
                {"original": "only one side"},
                {"corrected": "no original"},
                "not even an object"
            ]}"#,
        ));
        let summarizer = MinuteSummarizer::new(llm);

        let result = summarizer
            .summarize_minute("text", 0, None, None)
            .await
            .unwrap();

        assert_eq!(result.corrections.len(), 1);
        assert_eq!(result.corrections[0].corrected, "TensorFlow");
    }

    #[tokio::test]
    async fn missing_corrections_default_to_empty() {
        let llm = Arc::new(CannedLm::new(
            r#"{"summary": "s", "keywords": ["k"], "topic": "t"}"#,
        ));
        let summarizer = MinuteSummarizer::new(llm);

        let result = summarizer
            .summarize_minute("text", 0, None, None)
            .await
            .unwrap();
        assert!(result.corrections.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_a_summarization_error() {
        let llm = Arc::new(CannedLm::new("the model rambled instead of emitting JSON"));
        let summarizer = MinuteSummarizer::new(llm);

        let err = summarizer
            .summarize_minute("text", 4, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Summarization(_)));
    }

    #[test]
    fn prompt_orders_context_blocks() {
        let prompt = build_user_prompt("the transcript", Some("previous"), Some("domain hints"));
        let ctx_pos = prompt.find("domain hints").unwrap();
        let prev_pos = prompt.find("previous").unwrap();
        let transcript_pos = prompt.find("the transcript").unwrap();
        assert!(ctx_pos < prev_pos && prev_pos < transcript_pos);
    }
}
