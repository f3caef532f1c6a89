//! Provider registry — constructs adapters from config and hands out
//! shared references.

use std::collections::HashMap;
use std::sync::Arc;

use ca_domain::config::{LlmConfig, ProviderKind};
use ca_domain::error::Result;

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Config-order ids, for deterministic default selection.
    order: Vec<String>,
}

impl ProviderRegistry {
    /// Build every configured provider. A provider that fails to
    /// initialize (usually a missing API key) is logged and skipped; an
    /// empty registry means the API rejects turns until credentials are
    /// configured.
    pub fn from_config(llm: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut order = Vec::new();

        for cfg in &llm.providers {
            let built: Result<Arc<dyn LlmProvider>> = match cfg.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(cfg, llm).map(|p| Arc::new(p) as _)
                }
            };
            match built {
                Ok(provider) => {
                    order.push(cfg.id.clone());
                    providers.insert(cfg.id.clone(), provider);
                    tracing::info!(provider = %cfg.id, "LLM provider initialized");
                }
                Err(e) => {
                    tracing::warn!(provider = %cfg.id, error = %e, "LLM provider skipped");
                }
            }
        }

        Ok(Self { providers, order })
    }

    /// A registry holding exactly one provider — embedding and tests.
    pub fn single(id: &str, provider: Arc<dyn LlmProvider>) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert(id.to_string(), provider);
        Self {
            providers,
            order: vec![id.to_string()],
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(id).cloned()
    }

    /// The first successfully-initialized provider, in config order.
    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.order.first().and_then(|id| self.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_empty_registry() {
        let registry = ProviderRegistry::from_config(&LlmConfig::default()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.default_provider().is_none());
    }
}
