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

use thiserror::Error;

/// Error taxonomy for the recording pipeline.
///
/// On-demand paths (range extraction, RAG queries, explicit classification)
/// surface these to the caller. Inside the session worker and the best-effort
/// finalization stages they are logged and converted to notify-error messages
/// instead of terminating the session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("recording {0} not found")]
    RecordingNotFound(i64),

    #[error("a recording is already active")]
    RecordingAlreadyActive,

    #[error("no recording session is active")]
    SessionNotActive,

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("summarization failed: {0}")]
    Summarization(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("no active templates found")]
    TemplateNotFound,

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_stage() {
        assert_eq!(
            PipelineError::RecordingNotFound(7).to_string(),
            "recording 7 not found"
        );
        assert_eq!(
            PipelineError::RecordingAlreadyActive.to_string(),
            "a recording is already active"
        );
        assert_eq!(
            PipelineError::TemplateNotFound.to_string(),
            "no active templates found"
        );
        assert_eq!(
            PipelineError::Summarization("LM call failed".into()).to_string(),
            "summarization failed: LM call failed"
        );
    }

    #[test]
    fn storage_errors_convert_from_sqlx() {
        let err: PipelineError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(err.to_string().starts_with("storage error:"));
    }
}
