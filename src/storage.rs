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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;

use crate::error::PipelineError;
use crate::types::{HourSummary, RecordingStatus, TopicSegment, TranscriptionCorrection};

/// A recording session row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordingRecord {
    pub id: i64,
    pub title: Option<String>,
    pub context: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub audio_path: Option<String>,
    pub status: String,
    pub total_minutes: i64,
}

/// A one-minute transcription segment row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TranscriptRecord {
    pub id: i64,
    pub recording_id: i64,
    pub minute_index: i64,
    pub text: String,
    pub confidence: f64,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    recording_id: i64,
    minute_index: i64,
    summary_text: String,
    keywords: String,
    speakers: String,
    confidence: f64,
    model_used: String,
    corrections: String,
    created_at: DateTime<Utc>,
}

/// A one-minute LM summary row with decoded JSON columns.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub id: i64,
    pub recording_id: i64,
    pub minute_index: u32,
    pub summary_text: String,
    pub keywords: Vec<String>,
    pub speakers: Vec<String>,
    pub confidence: f64,
    pub model_used: String,
    pub corrections: Vec<TranscriptionCorrection>,
    pub created_at: DateTime<Utc>,
}

impl From<SummaryRow> for SummaryRecord {
    fn from(row: SummaryRow) -> Self {
        Self {
            id: row.id,
            recording_id: row.recording_id,
            minute_index: row.minute_index.max(0) as u32,
            summary_text: row.summary_text,
            keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            speakers: serde_json::from_str(&row.speakers).unwrap_or_default(),
            confidence: row.confidence,
            model_used: row.model_used,
            corrections: serde_json::from_str(&row.corrections).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct HourSummaryRow {
    id: i64,
    recording_id: i64,
    hour_index: i64,
    summary_text: String,
    keywords: String,
    topic_segments: String,
    token_count: i64,
    model_used: String,
    created_at: DateTime<Utc>,
}

/// An hour-level rollup row with decoded JSON columns.
#[derive(Debug, Clone)]
pub struct HourSummaryRecord {
    pub id: i64,
    pub recording_id: i64,
    pub hour_index: u32,
    pub summary_text: String,
    pub keywords: Vec<String>,
    pub topic_segments: Vec<TopicSegment>,
    pub token_count: usize,
    pub model_used: String,
    pub created_at: DateTime<Utc>,
}

impl From<HourSummaryRow> for HourSummaryRecord {
    fn from(row: HourSummaryRow) -> Self {
        Self {
            id: row.id,
            recording_id: row.recording_id,
            hour_index: row.hour_index.max(0) as u32,
            summary_text: row.summary_text,
            keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            topic_segments: serde_json::from_str(&row.topic_segments).unwrap_or_default(),
            token_count: row.token_count.max(0) as usize,
            model_used: row.model_used,
            created_at: row.created_at,
        }
    }
}

/// A field definition inside a template's output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    display_name: String,
    triggers: String,
    output_format: String,
    fields: String,
    icon: String,
    priority: i64,
    is_default: bool,
    is_active: bool,
}

/// An output template row with decoded JSON columns.
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub triggers: Vec<String>,
    pub output_format: String,
    pub fields: Vec<TemplateField>,
    pub icon: String,
    pub priority: i64,
    pub is_default: bool,
    pub is_active: bool,
}

impl From<TemplateRow> for TemplateRecord {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            triggers: serde_json::from_str(&row.triggers).unwrap_or_default(),
            output_format: row.output_format,
            fields: serde_json::from_str(&row.fields).unwrap_or_default(),
            icon: row.icon,
            priority: row.priority,
            is_default: row.is_default,
            is_active: row.is_active,
        }
    }
}

/// Parameters for creating a template.
#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub name: String,
    pub display_name: String,
    pub triggers: Vec<String>,
    pub output_format: String,
    pub fields: Vec<TemplateField>,
    pub icon: String,
    pub priority: i64,
    pub is_default: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ClassificationRow {
    id: i64,
    recording_id: i64,
    template_name: String,
    template_id: i64,
    start_minute: i64,
    end_minute: i64,
    confidence: f64,
    result_json: String,
    created_at: DateTime<Utc>,
}

/// A classification row with its decoded result map.
#[derive(Debug, Clone)]
pub struct ClassificationRecord {
    pub id: i64,
    pub recording_id: i64,
    pub template_name: String,
    pub template_id: i64,
    pub start_minute: u32,
    pub end_minute: u32,
    pub confidence: f64,
    pub result_json: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl From<ClassificationRow> for ClassificationRecord {
    fn from(row: ClassificationRow) -> Self {
        Self {
            id: row.id,
            recording_id: row.recording_id,
            template_name: row.template_name,
            template_id: row.template_id,
            start_minute: row.start_minute.max(0) as u32,
            end_minute: row.end_minute.max(0) as u32,
            confidence: row.confidence,
            result_json: serde_json::from_str(&row.result_json).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS recordings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT,
        context TEXT,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        audio_path TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        total_minutes INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS ix_recordings_status ON recordings(status)",
    "CREATE TABLE IF NOT EXISTS transcripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
        minute_index INTEGER NOT NULL,
        text TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL DEFAULT 0.0,
        language TEXT NOT NULL DEFAULT 'unknown',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_transcripts_recording_minute
        ON transcripts(recording_id, minute_index)",
    "CREATE TABLE IF NOT EXISTS summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
        minute_index INTEGER NOT NULL,
        summary_text TEXT NOT NULL DEFAULT '',
        keywords TEXT NOT NULL DEFAULT '[]',
        speakers TEXT NOT NULL DEFAULT '[]',
        confidence REAL NOT NULL DEFAULT 0.0,
        model_used TEXT NOT NULL DEFAULT '',
        corrections TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_summaries_recording_minute
        ON summaries(recording_id, minute_index)",
    "CREATE TABLE IF NOT EXISTS hour_summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
        hour_index INTEGER NOT NULL,
        summary_text TEXT NOT NULL DEFAULT '',
        keywords TEXT NOT NULL DEFAULT '[]',
        topic_segments TEXT NOT NULL DEFAULT '[]',
        token_count INTEGER NOT NULL DEFAULT 0,
        model_used TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL DEFAULT '',
        triggers TEXT NOT NULL DEFAULT '[]',
        output_format TEXT NOT NULL DEFAULT '',
        fields TEXT NOT NULL DEFAULT '[]',
        icon TEXT NOT NULL DEFAULT '',
        priority INTEGER NOT NULL DEFAULT 0,
        is_default INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS classifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
        template_name TEXT NOT NULL DEFAULT '',
        template_id INTEGER NOT NULL DEFAULT 0,
        start_minute INTEGER NOT NULL DEFAULT 0,
        end_minute INTEGER NOT NULL DEFAULT 0,
        confidence REAL NOT NULL DEFAULT 0.0,
        result_json TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rag_queries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL,
        answer TEXT NOT NULL DEFAULT '',
        source_count INTEGER NOT NULL DEFAULT 0,
        query_time_ms INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
];

/// SQLite-backed repository. Hand out transactional scopes via [`Storage::scope`].
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the database at `path` and bootstrap the
    /// schema. WAL journaling, foreign keys on.
    pub async fn connect(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Storage(sqlx::Error::Io(e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::debug!("storage ready at {}", path.display());
        Ok(Self { pool })
    }

    /// Begin a transactional scope. Commit is explicit; dropping the scope
    /// without committing rolls the transaction back.
    pub async fn scope(&self) -> Result<StorageScope<'_>, PipelineError> {
        Ok(StorageScope {
            tx: self.pool.begin().await?,
        })
    }
}

/// One repository transaction: commit on clean exit, rollback on drop.
pub struct StorageScope<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl<'a> StorageScope<'a> {
    pub async fn commit(self) -> Result<(), PipelineError> {
        self.tx.commit().await.map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Recordings
    // ------------------------------------------------------------------

    pub async fn create_recording(
        &mut self,
        title: Option<&str>,
        context: Option<&str>,
        audio_path: Option<&str>,
    ) -> Result<RecordingRecord, PipelineError> {
        let recording = sqlx::query_as::<_, RecordingRecord>(
            "INSERT INTO recordings (title, context, started_at, audio_path, status, total_minutes)
             VALUES (?, ?, ?, ?, ?, 0)
             RETURNING *",
        )
        .bind(title)
        .bind(context)
        .bind(Utc::now())
        .bind(audio_path)
        .bind(RecordingStatus::Active.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(recording)
    }

    pub async fn get_recording(
        &mut self,
        recording_id: i64,
    ) -> Result<RecordingRecord, PipelineError> {
        sqlx::query_as::<_, RecordingRecord>("SELECT * FROM recordings WHERE id = ?")
            .bind(recording_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(PipelineError::RecordingNotFound(recording_id))
    }

    pub async fn list_recordings(
        &mut self,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecordingRecord>, PipelineError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RecordingRecord>(
                    "SELECT * FROM recordings WHERE status = ?
                     ORDER BY id DESC LIMIT ? OFFSET ?",
                )
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&mut *self.tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, RecordingRecord>(
                    "SELECT * FROM recordings ORDER BY id DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&mut *self.tx)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn update_audio_path(
        &mut self,
        recording_id: i64,
        audio_path: &str,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query("UPDATE recordings SET audio_path = ? WHERE id = ?")
            .bind(audio_path)
            .bind(recording_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::RecordingNotFound(recording_id));
        }
        Ok(())
    }

    /// Mark a recording as completed, stamping `ended_at` and computing
    /// `total_minutes` as whole wall-clock minutes since `started_at`.
    pub async fn stop_recording(
        &mut self,
        recording_id: i64,
    ) -> Result<RecordingRecord, PipelineError> {
        let recording = self.get_recording(recording_id).await?;
        let ended_at = Utc::now();
        let total_minutes = (ended_at - recording.started_at).num_seconds().max(0) / 60;

        let updated = sqlx::query_as::<_, RecordingRecord>(
            "UPDATE recordings SET status = ?, ended_at = ?, total_minutes = ?
             WHERE id = ? RETURNING *",
        )
        .bind(RecordingStatus::Completed.as_str())
        .bind(ended_at)
        .bind(total_minutes)
        .bind(recording_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(updated)
    }

    pub async fn fail_recording(&mut self, recording_id: i64) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE recordings SET status = ?, ended_at = ? WHERE id = ?",
        )
        .bind(RecordingStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(recording_id)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::RecordingNotFound(recording_id));
        }
        Ok(())
    }

    /// Delete a recording; children cascade.
    pub async fn delete_recording(&mut self, recording_id: i64) -> Result<(), PipelineError> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(recording_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::RecordingNotFound(recording_id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transcripts
    // ------------------------------------------------------------------

    pub async fn create_transcript(
        &mut self,
        recording_id: i64,
        minute_index: u32,
        text: &str,
        confidence: f64,
        language: &str,
    ) -> Result<TranscriptRecord, PipelineError> {
        let transcript = sqlx::query_as::<_, TranscriptRecord>(
            "INSERT INTO transcripts (recording_id, minute_index, text, confidence, language, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(recording_id)
        .bind(minute_index as i64)
        .bind(text)
        .bind(confidence)
        .bind(language)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(transcript)
    }

    pub async fn list_transcripts(
        &mut self,
        recording_id: i64,
    ) -> Result<Vec<TranscriptRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, TranscriptRecord>(
            "SELECT * FROM transcripts WHERE recording_id = ? ORDER BY minute_index",
        )
        .bind(recording_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_summary(
        &mut self,
        recording_id: i64,
        minute_index: u32,
        summary_text: &str,
        keywords: &[String],
        speakers: &[String],
        confidence: f64,
        model_used: &str,
        corrections: &[TranscriptionCorrection],
    ) -> Result<SummaryRecord, PipelineError> {
        let row = sqlx::query_as::<_, SummaryRow>(
            "INSERT INTO summaries (recording_id, minute_index, summary_text, keywords,
                                    speakers, confidence, model_used, corrections, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(recording_id)
        .bind(minute_index as i64)
        .bind(summary_text)
        .bind(encode_json(keywords))
        .bind(encode_json(speakers))
        .bind(confidence)
        .bind(model_used)
        .bind(encode_json(corrections))
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    pub async fn list_summaries(
        &mut self,
        recording_id: i64,
    ) -> Result<Vec<SummaryRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT * FROM summaries WHERE recording_id = ? ORDER BY minute_index, id",
        )
        .bind(recording_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Summaries in `[start_minute, end_minute]` inclusive.
    pub async fn list_summaries_in_range(
        &mut self,
        recording_id: i64,
        start_minute: u32,
        end_minute: u32,
    ) -> Result<Vec<SummaryRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT * FROM summaries
             WHERE recording_id = ? AND minute_index >= ? AND minute_index <= ?
             ORDER BY minute_index, id",
        )
        .bind(recording_id)
        .bind(start_minute as i64)
        .bind(end_minute as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ------------------------------------------------------------------
    // Hour summaries
    // ------------------------------------------------------------------

    pub async fn create_hour_summary(
        &mut self,
        recording_id: i64,
        hour: &HourSummary,
    ) -> Result<HourSummaryRecord, PipelineError> {
        let row = sqlx::query_as::<_, HourSummaryRow>(
            "INSERT INTO hour_summaries (recording_id, hour_index, summary_text, keywords,
                                         topic_segments, token_count, model_used, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(recording_id)
        .bind(hour.hour_index as i64)
        .bind(&hour.summary_text)
        .bind(encode_json(&hour.keywords))
        .bind(encode_json(&hour.topic_segments))
        .bind(hour.token_count as i64)
        .bind(&hour.model_used)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    pub async fn list_hour_summaries(
        &mut self,
        recording_id: i64,
    ) -> Result<Vec<HourSummaryRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, HourSummaryRow>(
            "SELECT * FROM hour_summaries WHERE recording_id = ? ORDER BY hour_index",
        )
        .bind(recording_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ------------------------------------------------------------------
    // Classifications
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_classification(
        &mut self,
        recording_id: i64,
        template_name: &str,
        template_id: i64,
        start_minute: u32,
        end_minute: u32,
        confidence: f64,
        result_json: &Map<String, Value>,
    ) -> Result<ClassificationRecord, PipelineError> {
        let row = sqlx::query_as::<_, ClassificationRow>(
            "INSERT INTO classifications (recording_id, template_name, template_id,
                                          start_minute, end_minute, confidence,
                                          result_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(recording_id)
        .bind(template_name)
        .bind(template_id)
        .bind(start_minute as i64)
        .bind(end_minute as i64)
        .bind(confidence)
        .bind(Value::Object(result_json.clone()).to_string())
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    pub async fn list_classifications(
        &mut self,
        recording_id: i64,
    ) -> Result<Vec<ClassificationRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, ClassificationRow>(
            "SELECT * FROM classifications WHERE recording_id = ? ORDER BY id",
        )
        .bind(recording_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Active templates ordered by priority (highest first).
    pub async fn list_active_templates(
        &mut self,
    ) -> Result<Vec<TemplateRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM templates WHERE is_active = 1 ORDER BY priority DESC, id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_template_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<TemplateRecord>, PipelineError> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn create_template(
        &mut self,
        template: &NewTemplate,
    ) -> Result<TemplateRecord, PipelineError> {
        let row = sqlx::query_as::<_, TemplateRow>(
            "INSERT INTO templates (name, display_name, triggers, output_format, fields,
                                    icon, priority, is_default, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&template.name)
        .bind(&template.display_name)
        .bind(encode_json(&template.triggers))
        .bind(&template.output_format)
        .bind(encode_json(&template.fields))
        .bind(&template.icon)
        .bind(template.priority)
        .bind(template.is_default)
        .bind(template.is_active)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    // ------------------------------------------------------------------
    // RAG query audit
    // ------------------------------------------------------------------

    pub async fn create_rag_query(
        &mut self,
        query: &str,
        answer: &str,
        source_count: usize,
        query_time_ms: u64,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO rag_queries (query, answer, source_count, query_time_ms, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(query)
        .bind(answer)
        .bind(source_count as i64)
        .bind(query_time_ms as i64)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

fn encode_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::connect(&dir.path().join("test.db")).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn recording_lifecycle() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        let recording = scope
            .create_recording(Some("standup"), Some("sprint planning"), None)
            .await
            .unwrap();
        assert_eq!(recording.status, "active");
        assert!(recording.ended_at.is_none());
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        let stopped = scope.stop_recording(recording.id).await.unwrap();
        assert_eq!(stopped.status, "completed");
        assert!(stopped.ended_at.is_some());
        assert!(stopped.ended_at.unwrap() >= stopped.started_at);
        assert!(stopped.total_minutes >= 0);
        scope.commit().await.unwrap();
    }

    #[tokio::test]
    async fn audio_path_and_failure_transitions() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        let recording = scope.create_recording(None, None, None).await.unwrap();
        scope
            .update_audio_path(recording.id, "/data/audio/1.wav")
            .await
            .unwrap();
        scope.fail_recording(recording.id).await.unwrap();
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        let reloaded = scope.get_recording(recording.id).await.unwrap();
        assert_eq!(reloaded.audio_path.as_deref(), Some("/data/audio/1.wav"));
        assert_eq!(reloaded.status, "failed");
        assert!(reloaded.ended_at.is_some());

        let err = scope.update_audio_path(999, "/nope.wav").await.unwrap_err();
        assert!(matches!(err, PipelineError::RecordingNotFound(999)));
    }

    #[tokio::test]
    async fn missing_recording_is_reported() {
        let (_dir, storage) = temp_storage().await;
        let mut scope = storage.scope().await.unwrap();
        let err = scope.get_recording(999).await.unwrap_err();
        assert!(matches!(err, PipelineError::RecordingNotFound(999)));
    }

    #[tokio::test]
    async fn dropped_scope_rolls_back() {
        let (_dir, storage) = temp_storage().await;

        {
            let mut scope = storage.scope().await.unwrap();
            scope.create_recording(Some("lost"), None, None).await.unwrap();
            // No commit: dropping the scope discards the insert.
        }

        let mut scope = storage.scope().await.unwrap();
        let recordings = scope.list_recordings(None, 10, 0).await.unwrap();
        assert!(recordings.is_empty());
    }

    #[tokio::test]
    async fn summary_json_columns_round_trip_in_order() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        let recording = scope.create_recording(None, None, None).await.unwrap();
        let corrections = vec![
            TranscriptionCorrection {
                original: "tensor flow".into(),
                corrected: "TensorFlow".into(),
                reason: "domain term".into(),
            },
            TranscriptionCorrection {
                original: "cargoes".into(),
                corrected: "cargo".into(),
                reason: "".into(),
            },
        ];
        let summary = scope
            .create_summary(
                recording.id,
                3,
                "Discussed build tooling.",
                &["cargo".into(), "build".into()],
                &[],
                0.0,
                "ollama",
                &corrections,
            )
            .await
            .unwrap();
        scope.commit().await.unwrap();

        assert_eq!(summary.minute_index, 3);
        assert_eq!(summary.keywords, vec!["cargo", "build"]);
        // Corrections list order survives the JSON round trip.
        assert_eq!(summary.corrections, corrections);

        let mut scope = storage.scope().await.unwrap();
        let listed = scope.list_summaries(recording.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].corrections, corrections);
    }

    #[tokio::test]
    async fn range_listing_is_inclusive() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        let recording = scope.create_recording(None, None, None).await.unwrap();
        for minute in 0..6u32 {
            scope
                .create_summary(recording.id, minute, &format!("m{minute}"), &[], &[], 0.0, "", &[])
                .await
                .unwrap();
        }
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        let range = scope
            .list_summaries_in_range(recording.id, 2, 4)
            .await
            .unwrap();
        let minutes: Vec<u32> = range.iter().map(|s| s.minute_index).collect();
        assert_eq!(minutes, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        let recording = scope.create_recording(None, None, None).await.unwrap();
        scope
            .create_summary(recording.id, 0, "gone soon", &[], &[], 0.0, "", &[])
            .await
            .unwrap();
        scope
            .create_transcript(recording.id, 0, "hello", 0.9, "en")
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        scope.delete_recording(recording.id).await.unwrap();
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        assert!(scope.list_summaries(recording.id).await.unwrap().is_empty());
        assert!(scope.list_transcripts(recording.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn templates_order_by_priority() {
        let (_dir, storage) = temp_storage().await;

        let mut scope = storage.scope().await.unwrap();
        scope
            .create_template(&NewTemplate {
                name: "memo".into(),
                display_name: "Memo".into(),
                priority: 1,
                is_default: true,
                is_active: true,
                ..Default::default()
            })
            .await
            .unwrap();
        scope
            .create_template(&NewTemplate {
                name: "lecture".into(),
                display_name: "Lecture".into(),
                triggers: vec!["lecture".into(), "professor".into()],
                priority: 10,
                is_active: true,
                ..Default::default()
            })
            .await
            .unwrap();
        scope
            .create_template(&NewTemplate {
                name: "retired".into(),
                display_name: "Retired".into(),
                priority: 99,
                is_active: false,
                ..Default::default()
            })
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let mut scope = storage.scope().await.unwrap();
        let active = scope.list_active_templates().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "lecture");
        assert_eq!(active[0].triggers, vec!["lecture", "professor"]);

        let by_name = scope.get_template_by_name("memo").await.unwrap().unwrap();
        assert!(by_name.is_default);
        assert!(scope.get_template_by_name("absent").await.unwrap().is_none());
    }
}
