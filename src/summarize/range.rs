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

use std::sync::Arc;

use crate::error::PipelineError;
use crate::llm::{
    json_string, json_string_list, parse_llm_json, with_transport_retry, LanguageModel,
    LlmOptions,
};
use crate::types::RangeSummary;

const RANGE_SYSTEM_PROMPT: &str = "You are a transcription summarizer. \
Integrate the following minute-level summaries from a selected time range \
into a single cohesive summary.\n\n\
Rules:\n\
- Output ONLY valid JSON, no markdown fences or extra text.\n\
- Format: {\"summary\": \"...\", \"keywords\": [...]}\n\
- summary: A comprehensive paragraph capturing the key content of the selected range (max 300 tokens).\n\
- keywords: 5-10 important terms or phrases.\n\
- Preserve the original language of the summaries.";

/// Re-summarizes an arbitrary inclusive minute range, crossing hour
/// boundaries freely.
pub struct RangeExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl RangeExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Produce a unified summary over the listed minute summaries.
    ///
    /// `summaries` is the pre-fetched, minute-ordered list of
    /// `(minute_index, summary_text)` pairs within the range. An empty list
    /// fails with a "no summaries in range" error.
    pub async fn extract_range(
        &self,
        recording_id: i64,
        start_minute: u32,
        end_minute: u32,
        summaries: &[(u32, String)],
    ) -> Result<RangeSummary, PipelineError> {
        if summaries.is_empty() {
            return Err(PipelineError::Summarization(format!(
                "no summaries found in range [{start_minute}, {end_minute}] for recording {recording_id}"
            )));
        }

        let numbered = summaries
            .iter()
            .map(|(idx, text)| format!("[Minute {idx}] {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        let full_prompt = format!(
            "{RANGE_SYSTEM_PROMPT}\n\nTime range: minute {start_minute} to {end_minute}\n\
             Summaries to integrate:\n{numbered}"
        );

        let options = LlmOptions::default();
        let raw = with_transport_retry(|| self.llm.generate(&full_prompt, &options))
            .await
            .map_err(|err| {
                PipelineError::Summarization(format!(
                    "LM call failed for range [{start_minute}, {end_minute}] of recording {recording_id}: {err}"
                ))
            })?;

        let data = parse_llm_json(&raw).map_err(|err| {
            PipelineError::Summarization(format!(
                "invalid JSON from LM for range [{start_minute}, {end_minute}]: {err}"
            ))
        })?;

        Ok(RangeSummary {
            recording_id,
            start_minute,
            end_minute,
            summary_text: json_string(&data, "summary"),
            keywords: json_string_list(&data, "keywords"),
            included_minutes: summaries.iter().map(|(idx, _)| *idx).collect(),
            source_count: summaries.len(),
            model_used: self.llm.model().to_string(),
        })
    }
}
