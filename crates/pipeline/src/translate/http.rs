use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TranslationEngine;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
    /// Opaque backend selectors from the runtime config, forwarded verbatim
    /// so the sidecar picks its device and quantization.
    device: &'a str,
    compute_type: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translation: String,
}

/// Translation engine backed by an HTTP sidecar (e.g. an NLLB-200 service).
///
/// POSTs `{text, source, target, device, compute_type}` to
/// `<base_url>/translate` and expects `{translation}` back. Tags are passed
/// in model form.
pub struct HttpTranslator {
    client: Client,
    base_url: String,
    device: String,
    compute_type: String,
}

impl HttpTranslator {
    pub fn new(
        base_url: impl Into<String>,
        device: impl Into<String>,
        compute_type: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device: device.into(),
            compute_type: compute_type.into(),
        }
    }
}

#[async_trait]
impl TranslationEngine for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_model_tag: &str,
        target_model_tag: &str,
    ) -> anyhow::Result<String> {
        let url = format!("{}/translate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&TranslateRequest {
                text,
                source: source_model_tag,
                target: target_model_tag,
                device: &self.device,
                compute_type: &self.compute_type,
            })
            .send()
            .await
            .with_context(|| format!("translation request to {} failed", url))?
            .error_for_status()
            .context("translation service returned an error status")?;

        let body: TranslateResponse = response
            .json()
            .await
            .context("invalid translation response body")?;

        debug!(
            source = source_model_tag,
            target = target_model_tag,
            chars = body.translation.len(),
            "translation received"
        );

        Ok(body.translation)
    }

    fn name(&self) -> &str {
        "http_translate"
    }
}
