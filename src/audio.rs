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

use bytes::{Buf, BytesMut};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Minimum tail length worth sending to STT; shorter remnants are discarded.
const MIN_TAIL_SECONDS: f64 = 0.5;

/// RMS energy below this (on normalized samples) counts as silence.
pub const SILENCE_RMS_THRESHOLD: f32 = 0.01;

/// PCM framing parameters for the chunk buffer.
///
/// 16 kHz mono 16-bit is the convention for the STT engines this feeds, but
/// every parameter is configurable.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Duration of each output chunk in seconds.
    pub chunk_duration: f64,
    pub sample_rate: u32,
    /// Bytes per sample (2 = 16-bit PCM).
    pub sample_width: u16,
    pub channels: u16,
    /// Seconds of shared audio between consecutive chunks, to avoid word
    /// splits at chunk boundaries.
    pub overlap_duration: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_duration: 3.0,
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
            overlap_duration: 0.5,
        }
    }
}

impl ChunkConfig {
    pub fn frame_size(&self) -> usize {
        self.sample_width as usize * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }
}

/// Accumulates raw PCM bytes and yields fixed-duration sample chunks with
/// overlap retention.
pub struct AudioChunkBuffer {
    config: ChunkConfig,
    buffer: BytesMut,
}

impl AudioChunkBuffer {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
        }
    }

    /// Bytes required for one full chunk, aligned to a whole frame.
    pub fn chunk_size_bytes(&self) -> usize {
        let frames = (self.config.chunk_duration * self.config.sample_rate as f64) as usize;
        frames * self.config.frame_size()
    }

    fn overlap_size_bytes(&self) -> usize {
        let frames = (self.config.overlap_duration * self.config.sample_rate as f64) as usize;
        frames * self.config.frame_size()
    }

    /// Duration of currently buffered audio in seconds.
    pub fn buffered_duration(&self) -> f64 {
        self.buffer.len() as f64 / self.config.bytes_per_second() as f64
    }

    /// Append raw PCM bytes. Never fails; validation happens at conversion.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn has_full_chunk(&self) -> bool {
        self.buffer.len() >= self.chunk_size_bytes()
    }

    /// Extract one chunk from the head of the buffer, retaining the trailing
    /// overlap region so the next chunk starts with context from the end of
    /// this one.
    pub fn take_chunk(&mut self) -> Option<Vec<f32>> {
        if !self.has_full_chunk() {
            return None;
        }

        let chunk_size = self.chunk_size_bytes();
        let samples = samples_from_aligned(&self.buffer[..chunk_size]);

        let consumed = chunk_size - self.overlap_size_bytes();
        self.buffer.advance(consumed);

        Some(samples)
    }

    /// Flush the remaining audio as a final chunk.
    ///
    /// Returns `None` when less than half a second remains. Always truncates
    /// to a whole-frame boundary before conversion.
    pub fn drain_tail(&mut self) -> Option<Vec<f32>> {
        let min_bytes =
            (MIN_TAIL_SECONDS * self.config.bytes_per_second() as f64) as usize;
        if self.buffer.len() < min_bytes {
            return None;
        }

        let frame_size = self.config.frame_size();
        let usable = self.buffer.len() - (self.buffer.len() % frame_size);
        if usable < min_bytes {
            return None;
        }

        let samples = samples_from_aligned(&self.buffer[..usable]);
        self.buffer.clear();
        Some(samples)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Convert frame-aligned little-endian signed 16-bit PCM to normalized f32.
fn samples_from_aligned(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert raw PCM bytes (16-bit signed LE) to normalized f32 samples.
///
/// Fails when the byte length is not a whole-frame multiple.
pub fn pcm_to_samples(data: &[u8], config: &ChunkConfig) -> Result<Vec<f32>, PipelineError> {
    let frame_size = config.frame_size();
    if frame_size == 0 || data.len() % frame_size != 0 {
        return Err(PipelineError::Audio(format!(
            "PCM data length ({}) is not aligned to frame size ({})",
            data.len(),
            frame_size
        )));
    }
    Ok(samples_from_aligned(data))
}

/// Root-mean-square energy of a normalized sample slice.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Whether an audio segment is silence based on RMS energy.
pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
    samples.is_empty() || rms_energy(samples) < threshold
}

/// Write raw PCM bytes to a WAV file, preserving the input sample rate,
/// sample width, and channel count.
pub fn save_wav(
    pcm_data: &[u8],
    path: &Path,
    config: &ChunkConfig,
) -> Result<PathBuf, PipelineError> {
    if pcm_data.is_empty() {
        return Err(PipelineError::Audio(
            "cannot save empty PCM data to WAV".to_string(),
        ));
    }
    if pcm_data.len() % config.frame_size() != 0 {
        return Err(PipelineError::Audio(format!(
            "PCM data length ({}) is not aligned to frame size ({})",
            pcm_data.len(),
            config.frame_size()
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Audio(format!("failed to create audio dir: {e}")))?;
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: config.sample_width * 8,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| PipelineError::Audio(format!("failed to create WAV file: {e}")))?;

    for pair in pcm_data.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .map_err(|e| PipelineError::Audio(format!("failed to write WAV sample: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| PipelineError::Audio(format!("failed to finalize WAV file: {e}")))?;

    Ok(path.to_path_buf())
}
