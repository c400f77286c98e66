//! Provider router: resolves the configured `ProviderKind` into a provider.
//!
//! Resolution happens once, at the boundary. The workflow holds an
//! `Arc<dyn Provider>` and never branches on the backend again.

use std::sync::Arc;

use pagepilot_config::{AppConfig, ProviderKind};
use pagepilot_core::error::ProviderError;
use pagepilot_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;

/// Default OpenAI-compatible base URL for each built-in backend.
pub fn base_url_for(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        ProviderKind::Gateway => Some("https://ai-gateway.vercel.sh/v1"),
        ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
        ProviderKind::Nim => Some("https://integrate.api.nvidia.com/v1"),
        ProviderKind::Custom => None,
    }
}

/// Build the configured default provider.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    build_provider_for(config, config.default_provider)
}

/// Build a specific provider kind from configuration.
///
/// `providers.<kind>.api_url` overrides the built-in base URL. A missing API
/// key is a configuration error rather than a request-time 401.
pub fn build_provider_for(
    config: &AppConfig,
    kind: ProviderKind,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let base_url = config
        .provider(kind)
        .and_then(|p| p.api_url.clone())
        .or_else(|| base_url_for(kind).map(str::to_string))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!("providers.{kind}.api_url is required"))
        })?;

    let api_key = config.api_key_for(kind).ok_or_else(|| {
        let hint = kind
            .api_key_env()
            .map(|var| format!(" (set {var} or PAGEPILOT_API_KEY)"))
            .unwrap_or_default();
        ProviderError::NotConfigured(format!("no API key for provider '{kind}'{hint}"))
    })?;

    info!(provider = %kind, base_url = %base_url, "Resolved language model provider");
    Ok(Arc::new(OpenAiCompatProvider::new(kind.as_str(), base_url, api_key)?))
}
