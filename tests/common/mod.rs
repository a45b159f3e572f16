#![allow(dead_code)]

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recollect::llm::{EmbeddingProvider, LanguageModel, LlmError, LlmOptions};
use recollect::session::{NotifyFn, RecordingSession, SessionOptions};
use recollect::storage::{NewTemplate, Storage};

/// Deterministic LM standing in for a real provider. Inspects the prompt to
/// decide which pipeline stage is calling and answers with well-formed JSON.
/// A transcript containing `FAIL` makes the minute call error.
pub struct ScriptedLm {
    pub calls: AtomicUsize,
}

impl ScriptedLm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedLm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _options: &LlmOptions) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if prompt.contains("Classify the following text") {
            return Ok(json!({
                "category": "lecture",
                "confidence": 0.87,
                "reason": "The content reads like a lecture with a professor explaining topics.",
            })
            .to_string());
        }

        if prompt.contains("Ten-minute summaries to integrate") {
            return Ok(json!({
                "summary": "An hour of connected discussion.",
                "keywords": ["hour", "rollup"],
                "topic_segments": [{"topic": "main discussion", "minutes": "0-60"}],
            })
            .to_string());
        }

        if prompt.contains("One-minute summaries to integrate") {
            return Ok(json!({
                "summary": "A ten-minute digest.",
                "keywords": ["digest"],
                "topics": ["digest"],
            })
            .to_string());
        }

        if prompt.contains("Question:") {
            return Ok(json!({
                "answer": "A grounded answer.",
                "source_indices": [0],
            })
            .to_string());
        }

        // Minute summarization path.
        let transcript = prompt
            .rsplit("Transcript to summarize:\n")
            .next()
            .unwrap_or("")
            .trim();
        if transcript.contains("FAIL") {
            return Err(LlmError::Provider("scripted minute failure".to_string()));
        }
        Ok(json!({
            "summary": format!("Summary: {transcript}"),
            "keywords": ["keyword-a", "keyword-b"],
            "topic": "test topic",
            "corrections": [],
        })
        .to_string())
    }
}

/// Cheap deterministic embedding derived from the text bytes.
pub struct HashEmbedding;

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vector = [0.1f32; 4];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 4] += byte as f32 / 255.0;
        }
        Ok(vector.to_vec())
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Embedder whose every call fails, for side-channel degradation tests.
pub struct FailingEmbedding;

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Provider("embedder down".to_string()))
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Notify callback that records every payload it receives.
pub fn collecting_notify() -> (NotifyFn, Arc<Mutex<Vec<Value>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let notify: NotifyFn = Arc::new(move |payload| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(payload);
            Ok(())
        }
        .boxed()
    });
    (notify, collected)
}

/// Notify callback that always fails; sessions must shrug it off.
pub fn failing_notify() -> NotifyFn {
    Arc::new(|_payload| async { Err(anyhow::anyhow!("notify channel down")) }.boxed())
}

pub async fn temp_storage() -> (tempfile::TempDir, Arc<Storage>) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::connect(&dir.path().join("recollect.db"))
        .await
        .unwrap();
    (dir, Arc::new(storage))
}

/// Seed the template set the auto-classification path resolves against.
pub async fn seed_templates(storage: &Storage) {
    let mut scope = storage.scope().await.unwrap();
    scope
        .create_template(&NewTemplate {
            name: "lecture".into(),
            display_name: "Lecture Notes".into(),
            triggers: vec!["lecture".into(), "professor".into()],
            icon: "📚".into(),
            priority: 10,
            is_active: true,
            ..Default::default()
        })
        .await
        .unwrap();
    scope
        .create_template(&NewTemplate {
            name: "meeting".into(),
            display_name: "Meeting Minutes".into(),
            triggers: vec!["agenda".into(), "action items".into()],
            icon: "📋".into(),
            priority: 8,
            is_active: true,
            ..Default::default()
        })
        .await
        .unwrap();
    scope
        .create_template(&NewTemplate {
            name: "memo".into(),
            display_name: "Memo".into(),
            icon: "📝".into(),
            priority: 1,
            is_default: true,
            is_active: true,
            ..Default::default()
        })
        .await
        .unwrap();
    scope.commit().await.unwrap();
}

pub async fn create_recording(storage: &Storage) -> i64 {
    let mut scope = storage.scope().await.unwrap();
    let recording = scope.create_recording(None, None, None).await.unwrap();
    scope.commit().await.unwrap();
    recording.id
}

/// Session wired to mock components with a short drain interval.
pub fn build_session(
    recording_id: i64,
    notify: NotifyFn,
    llm: Arc<dyn LanguageModel>,
    storage: Arc<Storage>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    vectors: Option<Arc<dyn recollect::vector::VectorStore>>,
) -> RecordingSession {
    RecordingSession::with_components(
        recording_id,
        notify,
        SessionOptions {
            summarization_interval: Duration::from_millis(50),
            user_context: None,
        },
        llm,
        storage,
        embedding,
        vectors,
        "scripted".to_string(),
    )
}
