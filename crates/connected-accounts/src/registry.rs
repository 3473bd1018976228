//! Provider Registry
//!
//! Explicitly populated at startup, read-only afterwards (share it behind an
//! `Arc`).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::common::HttpClient;
use crate::config::Config;
use crate::provider::{builtin, handshake_for, Handshake, ProviderProfile};

/// An enabled provider as offered to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderChoice {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<ProviderProfile>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in provider, configured from `config`.
    pub fn with_builtin(config: &Config) -> Self {
        let mut registry = Self::new();
        for profile in builtin::all() {
            registry.register(builtin::configured(profile, config));
        }
        info!(
            "Provider registry ready ({} of {} enabled)",
            registry.enabled_choices().len(),
            registry.providers.len()
        );
        registry
    }

    /// Add a provider. A provider with the same id is replaced.
    pub fn register(&mut self, profile: ProviderProfile) {
        debug!(provider = %profile.id, enabled = profile.is_enabled(), "registering provider");
        self.providers.insert(profile.id.clone(), Arc::new(profile));
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<ProviderProfile>> {
        self.providers.get(id).cloned()
    }

    /// All registered providers, ordered by id.
    pub fn list(&self) -> Vec<Arc<ProviderProfile>> {
        let mut all: Vec<_> = self.providers.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Enabled providers as `(id, display name)` choices, ordered by name.
    pub fn enabled_choices(&self) -> Vec<ProviderChoice> {
        let mut choices: Vec<ProviderChoice> = self
            .providers
            .values()
            .filter(|p| p.is_enabled())
            .map(|p| ProviderChoice {
                id: p.id.clone(),
                name: p.name.clone(),
            })
            .collect();
        choices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        choices
    }

    /// The handshake for a registered provider.
    pub fn handshake(&self, id: &str, http: Arc<dyn HttpClient>) -> Option<Arc<dyn Handshake>> {
        self.by_id(id).map(|profile| handshake_for(profile, http))
    }
}
