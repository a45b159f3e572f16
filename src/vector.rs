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

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Compute the canonical vector-document id for a minute summary.
///
/// This format is load-bearing: the embedding path, cleanup, and reindexing
/// all derive it from here. Changing it requires a reindex.
pub fn summary_doc_id(recording_id: i64, minute_index: u32) -> String {
    format!("summary-{recording_id}-{minute_index}")
}

/// Parse a summary document id back into `(recording_id, minute_index)`.
pub fn parse_summary_doc_id(id: &str) -> Option<(i64, u32)> {
    let rest = id.strip_prefix("summary-")?;
    let (recording, minute) = rest.split_once('-')?;
    Some((recording.parse().ok()?, minute.parse().ok()?))
}

/// Metadata filter clause for vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    Contains(String, String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Filter::Eq(field, expected) => metadata.get(field) == Some(expected),
            Filter::Gte(field, bound) => {
                compare(metadata.get(field), bound).map_or(false, |ord| ord.is_ge())
            }
            Filter::Lte(field, bound) => {
                compare(metadata.get(field), bound).map_or(false, |ord| ord.is_le())
            }
            Filter::Contains(field, needle) => metadata
                .get(field)
                .and_then(Value::as_str)
                .map_or(false, |haystack| haystack.contains(needle.as_str())),
            Filter::And(clauses) => clauses.iter().all(|clause| clause.matches(metadata)),
        }
    }
}

/// Order a metadata value against a filter bound. Numbers compare
/// numerically, strings lexicographically (which is correct for ISO-8601
/// dates). Mixed or missing values never match.
fn compare(value: Option<&Value>, bound: &Value) -> Option<std::cmp::Ordering> {
    let value = value?;
    if let (Some(a), Some(b)) = (value.as_f64(), bound.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (value.as_str(), bound.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

/// A search hit: document plus cosine distance to the query vector.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub distance: f64,
}

/// Upsert/search interface over a single cosine-similarity collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        text: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> Result<(), PipelineError>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorHit>, PipelineError>;

    async fn delete(&self, id: &str) -> Result<(), PipelineError>;

    async fn count(&self) -> Result<usize, PipelineError>;
}

/// Cosine distance between two vectors: `1 - cos(a, b)`.
///
/// Zero-norm or length-mismatched inputs yield the maximum distance.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone)]
struct StoredDoc {
    text: String,
    vector: Vec<f32>,
    metadata: Map<String, Value>,
}

/// On-disk record. Vectors serialize natively through bincode; metadata is
/// embedded as a JSON string because bincode is not self-describing.
#[derive(Serialize, Deserialize)]
struct PersistedDoc {
    id: String,
    text: String,
    vector: Vec<f32>,
    metadata_json: String,
}

/// File-backed vector store holding one collection in memory and persisting
/// it with bincode on every mutation.
pub struct FileVectorStore {
    path: PathBuf,
    docs: RwLock<HashMap<String, StoredDoc>>,
}

impl FileVectorStore {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let mut docs = HashMap::new();

        if path.exists() {
            let raw = std::fs::read(path)
                .map_err(|e| PipelineError::Retrieval(format!("failed to read vector store: {e}")))?;
            let persisted: Vec<PersistedDoc> = bincode::deserialize(&raw).map_err(|e| {
                PipelineError::Retrieval(format!("failed to decode vector store: {e}"))
            })?;
            for doc in persisted {
                let metadata = serde_json::from_str(&doc.metadata_json).unwrap_or_default();
                docs.insert(
                    doc.id,
                    StoredDoc {
                        text: doc.text,
                        vector: doc.vector,
                        metadata,
                    },
                );
            }
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Retrieval(format!("failed to create vector store dir: {e}"))
            })?;
        }

        tracing::info!(
            "vector store ready ({} docs) at {}",
            docs.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            docs: RwLock::new(docs),
        })
    }

    fn snapshot(&self) -> Result<Vec<u8>, PipelineError> {
        let docs = self.docs.read();
        let persisted: Vec<PersistedDoc> = docs
            .iter()
            .map(|(id, doc)| PersistedDoc {
                id: id.clone(),
                text: doc.text.clone(),
                vector: doc.vector.clone(),
                metadata_json: Value::Object(doc.metadata.clone()).to_string(),
            })
            .collect();
        bincode::serialize(&persisted)
            .map_err(|e| PipelineError::Retrieval(format!("failed to encode vector store: {e}")))
    }

    async fn persist(&self) -> Result<(), PipelineError> {
        let encoded = self.snapshot()?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("failed to write vector store: {e}")))
    }
}

#[async_trait]
impl VectorStore for FileVectorStore {
    async fn upsert(
        &self,
        id: &str,
        text: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> Result<(), PipelineError> {
        self.docs.write().insert(
            id.to_string(),
            StoredDoc {
                text: text.to_string(),
                vector,
                metadata,
            },
        );
        self.persist().await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        let docs = self.docs.read();
        let mut hits: Vec<VectorHit> = docs
            .iter()
            .filter(|(_, doc)| {
                filter.map_or(true, |clause| clause.matches(&doc.metadata))
            })
            .map(|(id, doc)| VectorHit {
                id: id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                distance: cosine_distance(vector, &doc.vector),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<(), PipelineError> {
        let removed = self.docs.write().remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        Ok(self.docs.read().len())
    }
}
