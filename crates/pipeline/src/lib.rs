pub mod asr;
pub mod error;
pub mod language;
pub mod opus;
pub mod orchestrator;
pub mod translate;

pub use asr::{AsrEngine, AsrRequest, AsrResult};
pub use error::{DecodeError, PipelineError};
pub use language::LanguageRegistry;
pub use opus::OpusStream;
pub use orchestrator::{Pipeline, PipelineResult, PipelineTimings};
pub use translate::TranslationEngine;

/// Sample rate every engine in the pipeline consumes.
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;
