//! The serialized inference pipeline.
//!
//! One `Pipeline` is shared by every room in the process. The ASR and
//! translation engines share model state and are not safe to invoke
//! concurrently, so the whole transcribe-and-translate call runs under a
//! semaphore permit; rooms queue behind it. Backpressure is therefore
//! visible here and nowhere else.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::asr::{AsrEngine, AsrRequest};
use crate::error::PipelineError;
use crate::language::LanguageRegistry;
use crate::translate::TranslationEngine;

/// Wall-clock accounting for one utterance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineTimings {
    pub asr_ms: u64,
    pub translation_ms: u64,
}

/// Result of one utterance run: source transcription plus a translation per
/// target language. `translations` always carries the identity entry
/// `source_lang -> source_text` unless the transcript was empty.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub source_lang: String,
    pub source_text: String,
    pub translations: BTreeMap<String, String>,
    pub timings: PipelineTimings,
}

impl PipelineResult {
    /// True when the ASR heard nothing worth broadcasting.
    pub fn is_empty(&self) -> bool {
        self.source_text.is_empty()
    }
}

pub struct Pipeline {
    asr: Arc<dyn AsrEngine>,
    translator: Option<Arc<dyn TranslationEngine>>,
    registry: Arc<LanguageRegistry>,
    permits: Arc<Semaphore>,
    deadline: Option<Duration>,
}

impl Pipeline {
    /// `permits` is normally 1; raise it only for engines that document
    /// concurrency safety. `deadline` of None disables the per-utterance
    /// time limit.
    pub fn new(
        asr: Arc<dyn AsrEngine>,
        translator: Option<Arc<dyn TranslationEngine>>,
        registry: Arc<LanguageRegistry>,
        permits: usize,
        deadline: Option<Duration>,
    ) -> Self {
        info!(
            asr = asr.name(),
            translator = translator.as_ref().map(|t| t.name()),
            permits,
            ?deadline,
            "Pipeline created"
        );
        Self {
            asr,
            translator,
            registry,
            permits: Arc::new(Semaphore::new(permits.max(1))),
            deadline,
        }
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    /// Whether a translation engine is attached.
    pub fn has_translator(&self) -> bool {
        self.translator.is_some()
    }

    /// Runs one finalized utterance through ASR and fan-out translation.
    ///
    /// `declared_lang` is the speaker's validated language, used when the
    /// detected language is unusable. `targets` is the snapshot of distinct
    /// room languages captured when the job was accepted.
    pub async fn transcribe_and_translate(
        &self,
        pcm: Vec<f32>,
        declared_lang: &str,
        targets: &BTreeSet<String>,
    ) -> Result<PipelineResult, PipelineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Closed)?;

        match self.deadline {
            Some(deadline) => tokio::time::timeout(
                deadline,
                self.run_locked(pcm, declared_lang, targets),
            )
            .await
            .map_err(|_| PipelineError::Timeout(deadline))?,
            None => self.run_locked(pcm, declared_lang, targets).await,
        }
    }

    /// The model section proper; caller holds the permit.
    async fn run_locked(
        &self,
        pcm: Vec<f32>,
        declared_lang: &str,
        targets: &BTreeSet<String>,
    ) -> Result<PipelineResult, PipelineError> {
        let asr_started = Instant::now();
        let asr_result = self
            .asr
            .transcribe(AsrRequest {
                pcm_16k_mono: pcm,
                language_hint: None,
            })
            .await
            .map_err(|e| PipelineError::AsrFailed(e.to_string()))?;
        let asr_ms = asr_started.elapsed().as_millis() as u64;

        let source_text = asr_result.text.trim().to_string();
        let mut timings = PipelineTimings {
            asr_ms,
            translation_ms: 0,
        };

        if source_text.is_empty() {
            debug!("ASR returned empty transcription, skipping translation");
            return Ok(PipelineResult {
                source_lang: declared_lang.to_string(),
                source_text,
                translations: BTreeMap::new(),
                timings,
            });
        }

        let source_lang = self.resolve_source_lang(asr_result.language.as_deref(), declared_lang)?;

        let mut translations = BTreeMap::new();
        translations.insert(source_lang.clone(), source_text.clone());

        let remaining: Vec<&String> = targets.iter().filter(|t| **t != source_lang).collect();
        if !remaining.is_empty() {
            let translate_started = Instant::now();
            let produced = self
                .translate_targets(&source_text, &source_lang, &remaining, &mut translations)
                .await;
            timings.translation_ms = translate_started.elapsed().as_millis() as u64;

            if produced == 0 {
                return Err(PipelineError::TranslationFailed);
            }
        }

        info!(
            source_lang = %source_lang,
            chars = source_text.len(),
            targets = translations.len(),
            asr_ms = timings.asr_ms,
            translation_ms = timings.translation_ms,
            "utterance processed"
        );

        Ok(PipelineResult {
            source_lang,
            source_text,
            translations,
            timings,
        })
    }

    /// Detected tag if the registry knows it, else the declared tag.
    fn resolve_source_lang(
        &self,
        detected: Option<&str>,
        declared: &str,
    ) -> Result<String, PipelineError> {
        if let Some(detected) = detected {
            if self.registry.is_supported(detected) {
                return Ok(detected.to_string());
            }
            warn!(
                detected,
                declared, "unsupported detected language, falling back to declared"
            );
        }
        if self.registry.is_supported(declared) {
            Ok(declared.to_string())
        } else {
            Err(PipelineError::LanguageIndeterminate)
        }
    }

    /// Translates into every remaining target, isolating per-target
    /// failures. Returns the number of successful targets.
    async fn translate_targets(
        &self,
        source_text: &str,
        source_lang: &str,
        remaining: &[&String],
        translations: &mut BTreeMap<String, String>,
    ) -> usize {
        let Some(translator) = &self.translator else {
            warn!(
                targets = remaining.len(),
                "no translation engine attached, all targets fail"
            );
            return 0;
        };

        // Both tags resolve: source_lang came out of the registry and every
        // target was validated at join time.
        let Some(source_model) = self.registry.resolve(source_lang) else {
            return 0;
        };

        let mut produced = 0;
        for target in remaining {
            let Some(target_model) = self.registry.resolve(target) else {
                warn!(target = %target, "target language missing from registry, skipping");
                continue;
            };
            match translator
                .translate(source_text, source_model, target_model)
                .await
            {
                Ok(text) => {
                    translations.insert((*target).clone(), text);
                    produced += 1;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "translation failed for target");
                }
            }
        }
        produced
    }
}
