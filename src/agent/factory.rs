//! Provider construction from application configuration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::ollama::OllamaProvider;
use crate::agent::openai::OpenAiProvider;
use crate::agent::provider::MultiProvider;
use crate::agent::{AgentError, LlmProvider};
use crate::config::{AppConfig, ProviderConfig};

/// Build the OpenAI provider if an API key is configured.
fn try_build_openai_provider(
    cfg: &ProviderConfig,
) -> Result<Option<Arc<dyn LlmProvider>>, AgentError> {
    let Some(key) = cfg.api_key.clone().filter(|k| !k.trim().is_empty()) else {
        return Ok(None);
    };
    let mut provider = OpenAiProvider::new(key)?;
    if let Some(url) = cfg.base_url.clone() {
        provider = provider.with_base_url(url).inspect_err(|e| {
            warn!("Invalid OPENAI_BASE_URL: {}", e);
        })?;
    }
    info!("LLM provider configured: OpenAI ({})", provider.base_url());
    Ok(Some(Arc::new(provider)))
}

/// Build the Ollama provider when explicitly configured, and kick off a
/// best-effort connectivity check in the background.
fn try_build_ollama_provider(
    cfg: Option<&ProviderConfig>,
) -> Result<Option<Arc<dyn LlmProvider>>, AgentError> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };
    let mut provider = OllamaProvider::new()?;
    if let Some(url) = cfg.base_url.clone() {
        provider = provider.with_base_url(url).inspect_err(|e| {
            warn!("Invalid OLLAMA_BASE_URL: {}", e);
        })?;
    }
    if let Some(key) = cfg.api_key.clone() {
        provider = provider.with_api_key(key);
    }
    info!("LLM provider configured: Ollama ({})", provider.base_url());

    let provider = Arc::new(provider);
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let checker = Arc::clone(&provider);
        handle.spawn(async move {
            match checker.check_connectivity().await {
                Ok(models) if models.is_empty() => {
                    info!("Ollama connected (no models pulled yet)");
                }
                Ok(models) => {
                    info!("Ollama connected, available models: {}", models.join(", "));
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Ollama connectivity check failed; requests may fail until it is reachable"
                    );
                }
            }
        });
    }
    Ok(Some(provider))
}

/// Build every configured provider behind one dispatcher.
///
/// Fails with `StartupConfigurationMissing` when nothing is configured.
pub fn build_providers(cfg: &AppConfig) -> Result<MultiProvider, AgentError> {
    cfg.require_provider_credentials()?;
    let openai = try_build_openai_provider(&cfg.openai)?;
    let ollama = try_build_ollama_provider(cfg.ollama.as_ref())?;
    let multi = MultiProvider::new(openai).with_ollama(ollama);
    if !multi.has_any_provider() {
        return Err(AgentError::StartupConfigurationMissing(
            "no model provider could be configured".to_string(),
        ));
    }
    Ok(multi)
}
