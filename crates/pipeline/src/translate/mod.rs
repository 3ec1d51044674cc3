#[cfg(feature = "remote-translate")]
pub mod http;

use async_trait::async_trait;

/// Trait for pluggable translation engines.
///
/// Both tags are model tags (Flores-200 form); the registry owns the mapping
/// from client-facing short tags. Engines are invoked only while the
/// pipeline permit is held.
#[async_trait]
pub trait TranslationEngine: Send + Sync + 'static {
    /// Translates `text` between two model-tagged languages.
    async fn translate(
        &self,
        text: &str,
        source_model_tag: &str,
        target_model_tag: &str,
    ) -> anyhow::Result<String>;

    /// Human-readable engine name.
    fn name(&self) -> &str;
}
