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

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::classify::{match_template, ZeroShotClassifier};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::llm::{EmbeddingProvider, LanguageModel};
use crate::providers;
use crate::storage::Storage;
use crate::summarize::{HourSummarizer, MinuteSummarizer};
use crate::types::MinuteSummary;
use crate::vector::{summary_doc_id, FileVectorStore, VectorStore};

/// Async callback carrying summary results (or errors) back to the caller,
/// typically a WebSocket send.
pub type NotifyFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A transcript awaiting background summarization.
#[derive(Debug, Clone)]
struct PendingTranscript {
    minute_index: u32,
    text: String,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Seconds between queue drain cycles.
    pub summarization_interval: Duration,
    /// Optional user-provided context for STT error correction.
    pub user_context: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            summarization_interval: Duration::from_secs(60),
            user_context: None,
        }
    }
}

/// Minimum minute summaries an hour bucket needs before a rollup is produced.
const HOUR_SUMMARY_MIN_MINUTES: usize = 10;

/// Run a best-effort stage: failures are logged and discarded so the larger
/// pipeline proceeds.
async fn best_effort<F>(what: &str, fut: F)
where
    F: std::future::Future<Output = Result<(), PipelineError>>,
{
    if let Err(err) = fut.await {
        tracing::warn!("{what} failed (non-fatal): {err}");
    }
}

/// Manages one recording's background summarization pipeline.
///
/// Owns the work queue, the timer-drained worker task, the embedding
/// side-channel, and session finalization (completion, hour rollups,
/// auto-classification).
pub struct RecordingSession {
    recording_id: i64,
    queue: mpsc::UnboundedSender<PendingTranscript>,
    queue_rx: Option<mpsc::UnboundedReceiver<PendingTranscript>>,
    stop: CancellationToken,
    worker: Option<JoinHandle<()>>,
    notify: NotifyFn,
    options: SessionOptions,
    llm: Arc<dyn LanguageModel>,
    storage: Arc<Storage>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    vectors: Option<Arc<dyn VectorStore>>,
    /// Provider label recorded as `model_used` on summary rows.
    model_label: String,
}

impl RecordingSession {
    /// Build a session from configuration.
    ///
    /// The minute summarizer is bound to the configured LM provider. The
    /// embedding side-channel is constructed best-effort: if either the
    /// embedder or the vector store fails to initialize, embedding is
    /// disabled for the whole session and summarization proceeds without it.
    pub fn new(
        recording_id: i64,
        notify: NotifyFn,
        options: SessionOptions,
        settings: &Settings,
        storage: Arc<Storage>,
    ) -> Result<Self, PipelineError> {
        let llm = providers::create_language_model(settings)?;

        let (embedding, vectors) = match (
            providers::create_embedding(settings),
            FileVectorStore::open(&settings.vector_store_path),
        ) {
            (Ok(embedding), Ok(store)) => {
                (Some(embedding), Some(Arc::new(store) as Arc<dyn VectorStore>))
            }
            (embed_result, store_result) => {
                if let Err(err) = embed_result {
                    tracing::warn!("failed to initialize embedder: {err}");
                }
                if let Err(err) = store_result {
                    tracing::warn!("failed to initialize vector store: {err}");
                }
                tracing::warn!(
                    "embedding pipeline unavailable; summaries for recording {recording_id} will not be embedded"
                );
                (None, None)
            }
        };

        Ok(Self::with_components(
            recording_id,
            notify,
            options,
            llm,
            storage,
            embedding,
            vectors,
            settings.llm_provider.clone(),
        ))
    }

    /// Assemble a session from explicit components.
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        recording_id: i64,
        notify: NotifyFn,
        options: SessionOptions,
        llm: Arc<dyn LanguageModel>,
        storage: Arc<Storage>,
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        vectors: Option<Arc<dyn VectorStore>>,
        model_label: String,
    ) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        Self {
            recording_id,
            queue,
            queue_rx: Some(queue_rx),
            stop: CancellationToken::new(),
            worker: None,
            notify,
            options,
            llm,
            storage,
            embedding,
            vectors,
            model_label,
        }
    }

    pub fn recording_id(&self) -> i64 {
        self.recording_id
    }

    /// Launch the background summarization loop.
    pub fn start(&mut self) {
        let Some(queue_rx) = self.queue_rx.take() else {
            return; // already started
        };

        let worker = SessionWorker {
            recording_id: self.recording_id,
            queue: queue_rx,
            stop: self.stop.clone(),
            interval: self.options.summarization_interval,
            notify: self.notify.clone(),
            user_context: self.options.user_context.clone(),
            summarizer: MinuteSummarizer::new(self.llm.clone()),
            storage: self.storage.clone(),
            embedding: self.embedding.clone(),
            vectors: self.vectors.clone(),
            model_label: self.model_label.clone(),
            previous_summary: None,
        };
        self.worker = Some(tokio::spawn(worker.run()));
    }

    /// Add a transcript to the processing queue (non-blocking).
    pub fn enqueue_transcript(&self, minute_index: u32, text: impl Into<String>) {
        let item = PendingTranscript {
            minute_index,
            text: text.into(),
        };
        if self.queue.send(item).is_err() {
            tracing::warn!(
                "transcript queue for recording {} is closed; dropping minute {minute_index}",
                self.recording_id
            );
        }
    }

    /// Signal the loop to stop, wait for the final drain, then finalize:
    /// mark completed, generate hour rollups, auto-classify. Every
    /// finalization stage is best-effort.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                tracing::error!(
                    "summarization worker for recording {} panicked: {err}",
                    self.recording_id
                );
            }
        }

        best_effort("recording finalization", self.finalize_recording()).await;
        best_effort("hour summary generation", self.generate_hour_summaries()).await;
        best_effort("auto-classification", self.classify_recording()).await;
    }

    async fn finalize_recording(&self) -> Result<(), PipelineError> {
        let mut scope = self.storage.scope().await?;
        scope.stop_recording(self.recording_id).await?;
        scope.commit().await?;
        tracing::info!("recording {} finalized as completed", self.recording_id);
        Ok(())
    }

    /// Group minute summaries into hour buckets and roll up each bucket
    /// holding at least ten summaries. Per-bucket failures are logged and
    /// the remaining buckets still run.
    async fn generate_hour_summaries(&self) -> Result<(), PipelineError> {
        let mut scope = self.storage.scope().await?;
        let summaries = scope.list_summaries(self.recording_id).await?;
        scope.commit().await?;

        if summaries.is_empty() {
            tracing::info!(
                "no summaries for recording {}; skipping hour summaries",
                self.recording_id
            );
            return Ok(());
        }

        let mut hour_groups: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for summary in &summaries {
            if summary.summary_text.trim().is_empty() {
                continue;
            }
            hour_groups
                .entry(summary.minute_index / 60)
                .or_default()
                .push(summary.summary_text.clone());
        }

        let summarizer = HourSummarizer::new(self.llm.clone());

        for (hour_index, minute_summaries) in hour_groups {
            if minute_summaries.len() < HOUR_SUMMARY_MIN_MINUTES {
                tracing::info!(
                    "skipping hour {hour_index} for recording {} ({} minutes, need at least {HOUR_SUMMARY_MIN_MINUTES})",
                    self.recording_id,
                    minute_summaries.len()
                );
                continue;
            }

            match summarizer
                .summarize_hour(self.recording_id, hour_index, &minute_summaries)
                .await
            {
                Ok(hour) => {
                    let mut scope = self.storage.scope().await?;
                    scope.create_hour_summary(self.recording_id, &hour).await?;
                    scope.commit().await?;
                    tracing::info!(
                        "generated hour summary {hour_index} for recording {} (token_count={})",
                        self.recording_id,
                        hour.token_count
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        "failed to generate hour summary {hour_index} for recording {} (non-fatal): {err}",
                        self.recording_id
                    );
                }
            }
        }

        Ok(())
    }

    /// Classify the recording from its combined minute summaries, resolve an
    /// output template, and persist one classification row.
    async fn classify_recording(&self) -> Result<(), PipelineError> {
        let mut scope = self.storage.scope().await?;
        let summaries = scope.list_summaries(self.recording_id).await?;
        scope.commit().await?;

        if summaries.is_empty() {
            tracing::info!(
                "no summaries for recording {}; skipping classification",
                self.recording_id
            );
            return Ok(());
        }

        let combined: String = summaries
            .iter()
            .map(|s| s.summary_text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if combined.trim().is_empty() {
            return Ok(());
        }

        let classifier = ZeroShotClassifier::new(self.llm.clone());
        let result = classifier.classify(&combined, None).await?;

        let mut scope = self.storage.scope().await?;
        let templates = scope.list_active_templates().await?;
        let template = match_template(&templates, &result)?;

        let total_minutes = summaries.len() as u32;
        let mut result_json = Map::new();
        result_json.insert("category".into(), json!(result.category));
        result_json.insert("confidence".into(), json!(result.confidence));
        result_json.insert("reason".into(), json!(result.reason));
        result_json.insert(
            "template_display_name".into(),
            json!(template.display_name),
        );
        result_json.insert("template_icon".into(), json!(template.icon));

        scope
            .create_classification(
                self.recording_id,
                &template.name,
                template.id,
                0,
                total_minutes.saturating_sub(1),
                result.confidence,
                &result_json,
            )
            .await?;
        scope.commit().await?;

        tracing::info!(
            "recording {} classified as {:?} (confidence={:.2}, template={})",
            self.recording_id,
            result.category,
            result.confidence,
            template.name
        );
        Ok(())
    }
}

/// The background worker: a cooperative loop draining the queue on a timer
/// (or on stop), processing minutes strictly serially so the running
/// previous-summary context stays well-defined.
struct SessionWorker {
    recording_id: i64,
    queue: mpsc::UnboundedReceiver<PendingTranscript>,
    stop: CancellationToken,
    interval: Duration,
    notify: NotifyFn,
    user_context: Option<String>,
    summarizer: MinuteSummarizer,
    storage: Arc<Storage>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    vectors: Option<Arc<dyn VectorStore>>,
    model_label: String,
    previous_summary: Option<String>,
}

impl SessionWorker {
    async fn run(mut self) {
        tracing::info!(
            "summarization loop started for recording {}",
            self.recording_id
        );

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.drain_and_summarize().await;
        }

        // Final drain so no accepted work is lost on stop.
        self.drain_and_summarize().await;
        tracing::info!(
            "summarization loop ended for recording {}",
            self.recording_id
        );
    }

    /// Process every transcript currently in the queue, in enqueue order.
    async fn drain_and_summarize(&mut self) {
        while let Ok(item) = self.queue.try_recv() {
            if item.text.trim().is_empty() {
                tracing::debug!("skipping empty transcript for minute {}", item.minute_index);
                continue;
            }
            self.process_one(item).await;
        }
    }

    /// Full pipeline for one minute: summarize, persist, embed, notify.
    /// Failures never terminate the session; they become a notify-error.
    async fn process_one(&mut self, item: PendingTranscript) {
        let minute_index = item.minute_index;
        match self.summarize_and_persist(item).await {
            Ok(payload) => {
                if let Err(err) = (self.notify)(payload).await {
                    tracing::warn!(
                        "notify callback failed for minute {minute_index} (non-fatal): {err}"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    "summarization failed for recording={} minute={minute_index}: {err}",
                    self.recording_id
                );
                let payload = json!({
                    "error": true,
                    "detail": format!("Summarization failed for minute {minute_index}"),
                });
                if let Err(err) = (self.notify)(payload).await {
                    tracing::warn!(
                        "notify callback failed for minute {minute_index} (non-fatal): {err}"
                    );
                }
            }
        }
    }

    async fn summarize_and_persist(
        &mut self,
        item: PendingTranscript,
    ) -> Result<Value, PipelineError> {
        let result = self
            .summarizer
            .summarize_minute(
                &item.text,
                item.minute_index,
                self.previous_summary.as_deref(),
                self.user_context.as_deref(),
            )
            .await?;

        let mut scope = self.storage.scope().await?;
        scope
            .create_summary(
                self.recording_id,
                item.minute_index,
                &result.summary_text,
                &result.keywords,
                &[],
                0.0,
                &self.model_label,
                &result.corrections,
            )
            .await?;
        scope.commit().await?;

        self.previous_summary = Some(result.summary_text.clone());

        best_effort("summary embedding", self.embed_summary(&result)).await;

        Ok(json!({
            "minute_index": result.minute_index,
            "summary_text": result.summary_text,
            "keywords": result.keywords,
            "topic": result.topic,
            "corrections": result.corrections,
        }))
    }

    /// Embedding side-channel: vectorize the summary and upsert it under the
    /// canonical doc id. The caller discards failures.
    async fn embed_summary(&self, result: &MinuteSummary) -> Result<(), PipelineError> {
        let (Some(embedding), Some(vectors)) = (&self.embedding, &self.vectors) else {
            return Ok(());
        };

        let vector = embedding
            .embed(&result.summary_text)
            .await
            .map_err(|err| PipelineError::Retrieval(err.to_string()))?;

        let doc_id = summary_doc_id(self.recording_id, result.minute_index);
        let mut metadata = Map::new();
        metadata.insert("recording_id".into(), json!(self.recording_id));
        metadata.insert("minute_index".into(), json!(result.minute_index));
        metadata.insert("date".into(), json!(Utc::now().to_rfc3339()));
        metadata.insert("keywords".into(), json!(result.keywords.join(",")));

        vectors
            .upsert(&doc_id, &result.summary_text, vector, metadata)
            .await?;

        tracing::debug!("embedded summary {doc_id} into vector store");
        Ok(())
    }
}

/// Process-wide single-active-session guard.
///
/// The slot is owned by the application container; `cleanup` is the teardown
/// hook wired to process shutdown.
pub struct SessionRegistry {
    slot: Mutex<Option<RecordingSession>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Place a session in the slot and launch its worker.
    ///
    /// Fails with recording-already-active while the slot is occupied.
    pub async fn start(&self, mut session: RecordingSession) -> Result<(), PipelineError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(PipelineError::RecordingAlreadyActive);
        }
        session.start();
        tracing::info!(
            "started orchestrator session for recording {}",
            session.recording_id()
        );
        *slot = Some(session);
        Ok(())
    }

    /// Stop the active session, drain remaining transcripts, and finalize.
    ///
    /// Idempotent. The slot is cleared *before* awaiting `stop()`, so a new
    /// session may start while the prior one is still finalizing.
    pub async fn stop_session(&self) {
        let taken = self.slot.lock().await.take();
        if let Some(mut session) = taken {
            let recording_id = session.recording_id();
            session.stop().await;
            tracing::info!("stopped orchestrator session for recording {recording_id}");
        }
    }

    /// Force-stop the active session (called during app shutdown).
    pub async fn cleanup(&self) {
        self.stop_session().await;
    }

    /// Forward a transcript to the active session.
    pub async fn enqueue_transcript(
        &self,
        minute_index: u32,
        text: &str,
    ) -> Result<(), PipelineError> {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(session) => {
                session.enqueue_transcript(minute_index, text);
                Ok(())
            }
            None => Err(PipelineError::SessionNotActive),
        }
    }

    pub async fn active_recording_id(&self) -> Option<i64> {
        self.slot.lock().await.as_ref().map(|s| s.recording_id())
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}
