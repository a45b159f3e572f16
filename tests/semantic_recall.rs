//! Retrieval over summaries a live session embedded: session → vector store
//! → RAG query, all against the file-backed store.

mod common;

use std::sync::Arc;

use common::*;
use recollect::rag::{RagRetriever, NO_MATCH_ANSWER};
use recollect::session::SessionRegistry;
use recollect::types::RagQueryRequest;
use recollect::vector::{FileVectorStore, VectorStore};

async fn run_session(
    storage: &Arc<recollect::storage::Storage>,
    vectors: Arc<dyn VectorStore>,
    recording_id: i64,
    lines: &[&str],
) {
    let (notify, _collected) = collecting_notify();
    let session = build_session(
        recording_id,
        notify,
        ScriptedLm::new(),
        storage.clone(),
        Some(Arc::new(HashEmbedding)),
        Some(vectors),
    );
    let registry = SessionRegistry::new();
    registry.start(session).await.unwrap();
    for (minute, line) in lines.iter().enumerate() {
        registry
            .enqueue_transcript(minute as u32, *line)
            .await
            .unwrap();
    }
    registry.stop_session().await;
}

#[tokio::test]
async fn a_recorded_session_is_queryable() {
    let (dir, storage) = temp_storage().await;
    seed_templates(&storage).await;
    let recording_id = create_recording(&storage).await;

    let vectors: Arc<dyn VectorStore> =
        Arc::new(FileVectorStore::open(&dir.path().join("vectors.bin")).unwrap());

    run_session(
        &storage,
        vectors.clone(),
        recording_id,
        &["We discussed the Rust borrow checker.", "Then ownership rules."],
    )
    .await;

    assert_eq!(vectors.count().await.unwrap(), 2);

    let retriever = RagRetriever::new(ScriptedLm::new(), Arc::new(HashEmbedding), vectors);
    let response = retriever
        .query(&RagQueryRequest {
            min_similarity: 0.0,
            ..RagQueryRequest::new("what did we discuss about rust?")
        })
        .await
        .unwrap();

    assert_eq!(response.answer, "A grounded answer.");
    assert!(!response.sources.is_empty());
    assert!(response
        .sources
        .iter()
        .all(|s| s.recording_id == recording_id));
    assert_eq!(response.model_used, "scripted");
}

#[tokio::test]
async fn queries_with_impossible_filters_return_the_no_match_answer() {
    let (dir, storage) = temp_storage().await;
    seed_templates(&storage).await;
    let recording_id = create_recording(&storage).await;

    let vectors: Arc<dyn VectorStore> =
        Arc::new(FileVectorStore::open(&dir.path().join("vectors.bin")).unwrap());

    run_session(&storage, vectors.clone(), recording_id, &["some content"]).await;

    let retriever = RagRetriever::new(ScriptedLm::new(), Arc::new(HashEmbedding), vectors);
    let response = retriever
        .query(&RagQueryRequest {
            keywords: vec!["keyword-that-never-occurs".to_string()],
            ..RagQueryRequest::new("anything")
        })
        .await
        .unwrap();

    assert_eq!(response.answer, NO_MATCH_ANSWER);
    assert!(response.sources.is_empty());
    assert_eq!(response.model_used, "");
}

#[tokio::test]
async fn find_similar_reaches_across_recordings() {
    let (dir, storage) = temp_storage().await;
    seed_templates(&storage).await;
    let first = create_recording(&storage).await;
    let second = create_recording(&storage).await;

    let vectors: Arc<dyn VectorStore> =
        Arc::new(FileVectorStore::open(&dir.path().join("vectors.bin")).unwrap());

    run_session(
        &storage,
        vectors.clone(),
        first,
        &["Rust memory management deep dive."],
    )
    .await;
    run_session(
        &storage,
        vectors.clone(),
        second,
        &["Another talk about Rust memory."],
    )
    .await;

    let retriever = RagRetriever::new(ScriptedLm::new(), Arc::new(HashEmbedding), vectors);
    let similar = retriever.find_similar(first, 5).await.unwrap();

    assert!(!similar.is_empty());
    assert!(similar.iter().all(|s| s.recording_id == second));
}
