#[cfg(feature = "local-whisper")]
pub mod local_whisper;

use async_trait::async_trait;

/// Request to transcribe one finalized utterance.
pub struct AsrRequest {
    /// PCM audio at 16 kHz mono, f32 normalized [-1.0, 1.0].
    pub pcm_16k_mono: Vec<f32>,
    /// Optional fixed source language (ISO 639-1). None enables detection.
    pub language_hint: Option<String>,
}

/// Result of an ASR transcription.
#[derive(Debug, Clone)]
pub struct AsrResult {
    pub text: String,
    /// Detected source language as a short tag, when the engine knows it.
    pub language: Option<String>,
}

/// Trait for pluggable ASR engines.
///
/// Engines are invoked only while the pipeline permit is held and need not
/// be internally concurrency-safe.
#[async_trait]
pub trait AsrEngine: Send + Sync + 'static {
    /// Transcribes a complete utterance.
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult>;

    /// Human-readable engine name.
    fn name(&self) -> &str;
}
