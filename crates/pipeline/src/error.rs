use std::time::Duration;

use thiserror::Error;

/// Failure decoding a single inbound audio packet.
///
/// The room's policy is to drop the packet and keep the utterance alive; a
/// run of consecutive failures aborts the utterance instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("opus decode failed: {0}")]
    Opus(#[from] audiopus::Error),
    #[error("empty audio packet")]
    EmptyPacket,
}

/// Failure of a full utterance run through the inference pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("speech recognition failed: {0}")]
    AsrFailed(String),
    #[error("source language could not be determined")]
    LanguageIndeterminate,
    #[error("translation failed for every target language")]
    TranslationFailed,
    #[error("utterance processing exceeded the {}ms deadline", .0.as_millis())]
    Timeout(Duration),
    #[error("pipeline is shut down")]
    Closed,
}
