//! HTTP adapters for third-party image-generation APIs behind one
//! [`ImageProvider`] trait, plus the registry that owns their shared state.

use std::collections::BTreeMap;
use std::sync::Arc;

use imagegen_contracts::providers::{Operation, ProviderCapabilities};
use imagegen_contracts::usecases::ProviderSelector;
use imagegen_contracts::{EditInput, GenerateInput, ProviderError, ProviderResult};

pub mod base;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod diagnostics;
mod http;
pub mod images;
pub mod providers;
pub mod rate_limit;
pub mod retry;

pub use base::{AdapterBase, SharedState};
pub use config::EngineConfig;
pub use diagnostics::{
    default_diagnostic_names, run_diagnostics, DiagnosticOutcome, DiagnosticsEntry,
    DiagnosticsReport,
};

/// One external image-generation service.
///
/// Every adapter implements both operations; services without edit support
/// return [`ProviderError::Unsupported`] and say so in [`capabilities`].
///
/// [`capabilities`]: ImageProvider::capabilities
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn required_env_vars(&self) -> &[&str];
    fn capabilities(&self) -> ProviderCapabilities;
    fn is_configured(&self) -> bool;
    fn generate(&self, input: &GenerateInput) -> Result<ProviderResult, ProviderError>;
    fn edit(&self, input: &EditInput) -> Result<ProviderResult, ProviderError>;
}

pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
    shared: Arc<SharedState>,
    selector: ProviderSelector,
}

impl Default for ImageProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SharedState::default()), ProviderSelector::default())
    }

    pub fn with_parts(shared: Arc<SharedState>, selector: ProviderSelector) -> Self {
        Self {
            providers: BTreeMap::new(),
            shared,
            selector,
        }
    }

    /// State handed to every adapter built for this registry.
    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn configured_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.is_configured())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Picks a configured provider that supports `operation` for `prompt`.
    /// `requested` wins when it is one of them.
    pub fn select(
        &self,
        prompt: &str,
        operation: Operation,
        requested: Option<&str>,
    ) -> Option<&dyn ImageProvider> {
        let available: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, provider)| {
                provider.is_configured() && provider.capabilities().supports(operation)
            })
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(requested) = requested {
            if !available.iter().any(|name| name == requested) {
                tracing::debug!(
                    requested,
                    operation = %operation,
                    "requested provider unavailable; selecting another"
                );
            }
        }
        let name = self.selector.select_provider(prompt, &available, requested)?;
        self.get(&name)
    }

    pub fn generate(
        &self,
        input: &GenerateInput,
        requested: Option<&str>,
    ) -> Result<ProviderResult, ProviderError> {
        let provider = self
            .select(&input.prompt, Operation::Generate, requested)
            .ok_or(ProviderError::NoProviderAvailable {
                operation: Operation::Generate,
            })?;
        tracing::info!(provider = provider.name(), "generating image");
        provider.generate(input)
    }

    pub fn edit(
        &self,
        input: &EditInput,
        requested: Option<&str>,
    ) -> Result<ProviderResult, ProviderError> {
        let provider = self
            .select(&input.prompt, Operation::Edit, requested)
            .ok_or(ProviderError::NoProviderAvailable {
                operation: Operation::Edit,
            })?;
        tracing::info!(provider = provider.name(), "editing image");
        provider.edit(input)
    }
}

/// Registry with every built-in adapter, credentials read from the environment.
pub fn default_provider_registry(config: &EngineConfig) -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::new();
    let shared = registry.shared();
    registry.register(providers::OpenAiProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::GeminiProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::FluxProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::IdeogramProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::StabilityProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::FalProvider::from_env(config, Arc::clone(&shared)));
    registry.register(providers::ReplicateProvider::from_env(config, shared));
    registry
}
