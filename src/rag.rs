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

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::llm::{
    parse_llm_json, with_transport_retry, EmbeddingProvider, LanguageModel, LlmOptions,
};
use crate::types::{RagQueryRequest, RagQueryResponse, RagSource};
use crate::vector::{Filter, VectorHit, VectorStore};

/// Contractual no-match answer. The literal string signals "no matches" to
/// callers, who localize it as needed.
pub const NO_MATCH_ANSWER: &str = "관련 녹음을 찾을 수 없습니다.";

const RAG_SYSTEM_PROMPT: &str = "Answer using ONLY the provided context. \
Do not guess at information the context does not contain.\n\
Cite each source you use as [source: recording-{recording_id}, minute-{minute_index}].\n\
Output ONLY valid JSON: {\"answer\": \"...\", \"source_indices\": [0, 1, ...]}";

/// How many of a recording's own documents to pull when building its
/// similarity fingerprint.
const OWN_DOCS_FETCH_LIMIT: usize = 100;

/// Orchestrates RAG queries: embed → filtered vector search → grounded LM
/// answer.
pub struct RagRetriever {
    llm: Arc<dyn LanguageModel>,
    embedding: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl RagRetriever {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedding: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            llm,
            embedding,
            store,
        }
    }

    /// Run the full RAG pipeline for a natural-language query.
    pub async fn query(
        &self,
        request: &RagQueryRequest,
    ) -> Result<RagQueryResponse, PipelineError> {
        let start = Instant::now();

        let query_vector = self
            .embedding
            .embed(&request.query)
            .await
            .map_err(|err| PipelineError::Retrieval(format!("failed to embed query: {err}")))?;

        let filter = build_filter(request);

        let hits = self
            .store
            .search(&query_vector, request.top_k, filter.as_ref())
            .await
            .map_err(|err| PipelineError::Retrieval(format!("vector search failed: {err}")))?;

        let sources = results_to_sources(hits, request.min_similarity);

        if sources.is_empty() {
            return Ok(RagQueryResponse {
                answer: NO_MATCH_ANSWER.to_string(),
                sources: Vec::new(),
                model_used: String::new(),
                query_time_ms: start.elapsed().as_millis() as u64,
            });
        }

        let answer = self.generate_answer(&request.query, &sources).await?;

        Ok(RagQueryResponse {
            answer,
            sources,
            model_used: self.llm.model().to_string(),
            query_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Find recordings similar to the given recording.
    ///
    /// Combines the recording's own vector documents into one text, embeds
    /// the combination, searches the full store, and drops hits from the
    /// same recording.
    pub async fn find_similar(
        &self,
        recording_id: i64,
        top_k: usize,
    ) -> Result<Vec<RagSource>, PipelineError> {
        let probe = self
            .embedding
            .embed("")
            .await
            .map_err(|err| PipelineError::Retrieval(format!("failed to embed probe: {err}")))?;

        let own_filter = Filter::Eq("recording_id".to_string(), json!(recording_id));
        let own_docs = self
            .store
            .search(&probe, OWN_DOCS_FETCH_LIMIT, Some(&own_filter))
            .await
            .map_err(|err| PipelineError::Retrieval(format!("vector search failed: {err}")))?;

        if own_docs.is_empty() {
            return Ok(Vec::new());
        }

        let combined_text = own_docs
            .iter()
            .map(|doc| doc.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if combined_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let combined_vector = self.embedding.embed(&combined_text).await.map_err(|err| {
            PipelineError::Retrieval(format!("failed to embed combined text: {err}"))
        })?;

        let hits = self
            .store
            .search(&combined_vector, top_k + own_docs.len(), None)
            .await
            .map_err(|err| PipelineError::Retrieval(format!("vector search failed: {err}")))?;

        let other: Vec<VectorHit> = hits
            .into_iter()
            .filter(|hit| {
                hit.metadata.get("recording_id").and_then(Value::as_i64) != Some(recording_id)
            })
            .take(top_k)
            .collect();

        Ok(results_to_sources(other, 0.0))
    }

    async fn generate_answer(
        &self,
        query: &str,
        sources: &[RagSource],
    ) -> Result<String, PipelineError> {
        let context = sources
            .iter()
            .enumerate()
            .map(|(i, src)| {
                format!(
                    "[{i}] recording-{}, minute-{} ({}): {}",
                    src.recording_id, src.minute_index, src.date, src.summary_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!("{RAG_SYSTEM_PROMPT}\n\nContext:\n{context}\n\nQuestion: {query}");
        let options = LlmOptions::default();

        let raw = with_transport_retry(|| self.llm.generate(&prompt, &options))
            .await
            .map_err(|err| {
                PipelineError::Retrieval(format!("LM answer generation failed: {err}"))
            })?;

        // Valid JSON yields .answer; anything else is used verbatim.
        Ok(match parse_llm_json(&raw) {
            Ok(data) => match data.get("answer").and_then(Value::as_str) {
                Some(answer) => answer.to_string(),
                None => crate::llm::strip_code_fences(&raw),
            },
            Err(_) => crate::llm::strip_code_fences(&raw),
        })
    }
}

/// Build the vector-store filter from request filters: one predicate per
/// non-empty filter, conjunction only when more than one.
fn build_filter(request: &RagQueryRequest) -> Option<Filter> {
    let mut conditions = Vec::new();

    if let Some(category) = request.category.as_deref().filter(|c| !c.is_empty()) {
        conditions.push(Filter::Eq("category".to_string(), json!(category)));
    }
    if let Some(date_from) = request.date_from.as_deref().filter(|d| !d.is_empty()) {
        conditions.push(Filter::Gte("date".to_string(), json!(date_from)));
    }
    if let Some(date_to) = request.date_to.as_deref().filter(|d| !d.is_empty()) {
        conditions.push(Filter::Lte("date".to_string(), json!(date_to)));
    }
    for keyword in request.keywords.iter().filter(|k| !k.is_empty()) {
        conditions.push(Filter::Contains("keywords".to_string(), keyword.clone()));
    }

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(Filter::And(conditions)),
    }
}

/// Convert raw hits to sources: similarity = 1 − distance, drop below the
/// threshold, sort descending.
fn results_to_sources(hits: Vec<VectorHit>, min_similarity: f64) -> Vec<RagSource> {
    let mut sources: Vec<RagSource> = hits
        .into_iter()
        .filter_map(|hit| {
            let similarity = 1.0 - hit.distance;
            if similarity < min_similarity {
                return None;
            }
            Some(RagSource {
                recording_id: hit.metadata.get("recording_id").and_then(Value::as_i64).unwrap_or(0),
                minute_index: hit
                    .metadata
                    .get("minute_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                summary_text: hit.text,
                similarity: (similarity * 10000.0).round() / 10000.0,
                date: hit
                    .metadata
                    .get("date")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                category: hit
                    .metadata
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect();

    sources.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    sources
}
