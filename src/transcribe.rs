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
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::audio::{is_silent, AudioChunkBuffer, ChunkConfig, SILENCE_RMS_THRESHOLD};
use crate::error::PipelineError;
use crate::types::{FileTranscription, StreamingTranscription};

/// Speech-to-text engine seam. Engine implementations live outside the core;
/// anything that can recognize a buffered sample chunk plugs in here.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe an already-persisted audio file.
    async fn transcribe(&self, path: &Path) -> Result<FileTranscription, PipelineError>;

    /// Recognize one buffered chunk of normalized samples.
    async fn recognize(&self, samples: &[f32]) -> Result<FileTranscription, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk: ChunkConfig,
    pub silence_threshold: f32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            silence_threshold: SILENCE_RMS_THRESHOLD,
        }
    }
}

/// Output channel depth for the streaming driver.
const STREAM_BUFFER: usize = 32;

/// Drive streaming transcription over a PCM byte stream.
///
/// Buffers incoming bytes into fixed-duration overlapping chunks, skips
/// silent chunks, and emits one result per speech chunk. Remaining audio of
/// at least half a second is flushed when the input closes. A recognizer
/// error is forwarded once and terminates the stream.
pub fn transcribe_stream(
    stt: Arc<dyn SpeechToText>,
    options: StreamOptions,
    mut input: mpsc::Receiver<Bytes>,
) -> ReceiverStream<Result<StreamingTranscription, PipelineError>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let threshold = options.silence_threshold;

    tokio::spawn(async move {
        let mut buffer = AudioChunkBuffer::new(options.chunk);

        while let Some(data) = input.recv().await {
            buffer.append(&data);

            while let Some(samples) = buffer.take_chunk() {
                if is_silent(&samples, threshold) {
                    continue;
                }
                if !emit_chunk(&stt, &samples, &tx).await {
                    return;
                }
            }
        }

        if let Some(tail) = buffer.drain_tail() {
            if !is_silent(&tail, threshold) {
                emit_chunk(&stt, &tail, &tx).await;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Recognize one chunk and forward the result. Returns false when the stream
/// should terminate (fatal STT error or closed receiver).
async fn emit_chunk(
    stt: &Arc<dyn SpeechToText>,
    samples: &[f32],
    tx: &mpsc::Sender<Result<StreamingTranscription, PipelineError>>,
) -> bool {
    match stt.recognize(samples).await {
        Ok(result) => {
            if result.text.trim().is_empty() {
                return true;
            }
            let item = StreamingTranscription {
                id: Uuid::new_v4(),
                text: result.text,
                is_final: true,
                confidence: result.confidence,
                segments: result.segments,
            };
            tx.send(Ok(item)).await.is_ok()
        }
        Err(err) => {
            tracing::error!("streaming transcription failed: {err}");
            let _ = tx.send(Err(err)).await;
            false
        }
    }
}
