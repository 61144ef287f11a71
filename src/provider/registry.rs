//! Provider registry
//!
//! Maps `provider_ref` identifiers from the stage plan to live
//! CapabilityProvider instances. Populated once by the composition root;
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TrellisError};
use crate::provider::client::CapabilityProvider;

/// Registry of Capability Providers keyed by reference name
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider under a reference name. Replaces any previous
    /// registration for the same name.
    pub fn register(&mut self, provider_ref: impl Into<String>, provider: Arc<dyn CapabilityProvider>) {
        self.providers.insert(provider_ref.into(), provider);
    }

    /// Look up a provider by reference name.
    pub fn get(&self, provider_ref: &str) -> Result<Arc<dyn CapabilityProvider>> {
        self.providers
            .get(provider_ref)
            .cloned()
            .ok_or_else(|| TrellisError::InvalidState(format!("unknown provider: {}", provider_ref)))
    }

    /// True if a provider is registered under this name.
    pub fn contains(&self, provider_ref: &str) -> bool {
        self.providers.contains_key(provider_ref)
    }

    /// All registered reference names.
    pub fn provider_refs(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
