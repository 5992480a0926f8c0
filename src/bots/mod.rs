//! Seed-URL Capability Table
//!
//! The only coupling between the coordination core and the site-specific
//! scraping bots: given a data source, produce its seed URLs. Bots are
//! registered by class name in a lookup table; there is no dynamic
//! invocation of any kind.

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::sync::Arc;

use crate::protocol::DataSourceSnapshot;

/// Type alias for a registered seed provider.
pub type SeedProviderFn = Arc<dyn Fn(&DataSourceSnapshot) -> Result<Vec<String>> + Send + Sync>;

/// Maps bot class names to their seed-URL providers.
pub struct BotRegistry {
    providers: DashMap<String, SeedProviderFn>,
}

impl BotRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            providers: DashMap::new(),
        })
    }

    /// Registers a provider under a bot class name.
    pub fn register<F>(&self, bot_class: &str, provider: F)
    where
        F: Fn(&DataSourceSnapshot) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        self.providers
            .insert(bot_class.to_string(), Arc::new(provider));
        tracing::info!("Registered seed provider for bot class: {}", bot_class);
    }

    /// Retrieves seed URLs for a source via its registered bot class.
    pub fn seed_urls(&self, source: &DataSourceSnapshot) -> Result<Vec<String>> {
        match self.providers.get(&source.bot_class) {
            Some(provider) => provider.value()(source),
            None => Err(anyhow!("unknown bot class: {}", source.bot_class)),
        }
    }

    pub fn has_provider(&self, bot_class: &str) -> bool {
        self.providers.contains_key(bot_class)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
