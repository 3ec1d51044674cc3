use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrEngine, AsrRequest, AsrResult};

/// Local ASR engine running whisper.cpp through whisper-rs.
///
/// The context holds the mmapped model and is shared across calls; every
/// transcription creates its own whisper state, so the engine itself carries
/// no per-call mutability and no locking.
pub struct WhisperEngine {
    ctx: Arc<WhisperContext>,
    beam_size: usize,
    default_language: Option<String>,
}

/// Beam search when the configured width allows it, greedy otherwise.
/// Patience is left at whisper.cpp's default (disabled).
fn sampling_strategy(beam_size: usize) -> SamplingStrategy {
    if beam_size > 1 {
        SamplingStrategy::BeamSearch {
            beam_size: beam_size as i32,
            patience: -1.0,
        }
    } else {
        SamplingStrategy::Greedy { best_of: 1 }
    }
}

impl WhisperEngine {
    /// Loads a GGML Whisper model from disk.
    ///
    /// `device` is the opaque selector from the runtime config: `cpu` keeps
    /// inference off the GPU, `cuda` enables it, and `cuda:<n>` additionally
    /// picks a device index. Quantization is baked into the GGML file, so
    /// there is no compute-type knob to forward here.
    pub fn new(
        model_path: &str,
        beam_size: usize,
        default_language: Option<String>,
        device: &str,
    ) -> anyhow::Result<Self> {
        let mut ctx_params = WhisperContextParameters::default();
        if device == "cpu" {
            ctx_params.use_gpu(false);
        } else {
            ctx_params.use_gpu(true);
            if let Some((_, index)) = device.split_once(':') {
                match index.parse::<i32>() {
                    Ok(index) => {
                        ctx_params.gpu_device(index);
                    }
                    Err(_) => warn!(device, "ignoring unparseable gpu index"),
                }
            }
        }

        info!(model_path, device, beam_size, "loading whisper model");
        let ctx = WhisperContext::new_with_params(model_path, ctx_params)
            .map_err(|e| anyhow::anyhow!("failed to load whisper model '{model_path}': {e}"))?;
        info!("whisper model loaded");

        Ok(Self {
            ctx: Arc::new(ctx),
            beam_size,
            default_language,
        })
    }
}

#[async_trait]
impl AsrEngine for WhisperEngine {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult> {
        let ctx = Arc::clone(&self.ctx);
        let hint = request
            .language_hint
            .or_else(|| self.default_language.clone());
        let strategy = sampling_strategy(self.beam_size);
        let pcm = request.pcm_16k_mono;

        // Inference is CPU-bound; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<AsrResult> {
            let mut state = ctx
                .create_state()
                .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e}"))?;

            let mut params = FullParams::new(strategy);
            params.set_translate(false);
            params.set_suppress_blank(true);
            params.set_no_speech_thold(0.6);
            params.set_single_segment(false);
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            match hint.as_deref() {
                Some(lang) => params.set_language(Some(lang)),
                None => params.set_detect_language(true),
            }

            state
                .full(params, &pcm)
                .map_err(|e| anyhow::anyhow!("whisper inference failed: {e}"))?;

            let mut text = String::new();
            for i in 0..state.full_n_segments() {
                let Some(segment) = state.get_segment(i) else {
                    continue;
                };
                match segment.to_str() {
                    Ok(piece) => text.push_str(piece),
                    Err(e) => warn!(segment = i, error = %e, "skipping non-utf8 segment"),
                }
            }
            let text = text.trim().to_string();

            // Report a detected language only when detection actually ran;
            // a pinned hint is echoed back as-is. Whisper speaks ISO 639-1,
            // the same short form the registry keys on.
            let language = match hint {
                Some(lang) => Some(lang),
                None => {
                    whisper_rs::get_lang_str(state.full_lang_id_from_state()).map(str::to_string)
                }
            };

            debug!(chars = text.len(), ?language, "whisper transcription complete");

            Ok(AsrResult { text, language })
        })
        .await??;

        Ok(result)
    }

    fn name(&self) -> &str {
        "local_whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_beam_falls_back_to_greedy() {
        assert!(matches!(
            sampling_strategy(1),
            SamplingStrategy::Greedy { best_of: 1 }
        ));
        assert!(matches!(
            sampling_strategy(0),
            SamplingStrategy::Greedy { .. }
        ));
    }

    #[test]
    fn wide_beam_uses_beam_search() {
        assert!(matches!(
            sampling_strategy(5),
            SamplingStrategy::BeamSearch { beam_size: 5, .. }
        ));
    }
}
