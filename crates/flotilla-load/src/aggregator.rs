//! LoadAggregator — concurrent provider fan-out and identity resolution.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use flotilla_state::ProcessorId;

use crate::provider::LoadProvider;

/// Merges pending-ticket counts from all registered providers.
///
/// Providers are queried concurrently and joined before the result is
/// used; a failing provider contributes nothing but never blocks the
/// rest. Counts for the same canonical name (after alias mapping) are
/// summed across providers.
pub struct LoadAggregator {
    providers: Vec<Arc<dyn LoadProvider>>,
    /// Upstream name → canonical processor name.
    aliases: HashMap<String, String>,
}

impl Default for LoadAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadAggregator {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    /// Map upstream names to canonical processor names before merging.
    pub fn with_alias_map(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Register a provider.
    pub fn register(&mut self, provider: Arc<dyn LoadProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Fan out to all providers and merge results by canonical name.
    pub async fn fetch_by_name(&self) -> HashMap<String, u64> {
        let mut tasks = JoinSet::new();
        for provider in &self.providers {
            let provider = provider.clone();
            tasks.spawn(async move {
                let name = provider.name().to_string();
                (name, provider.fetch_pending_load().await)
            });
        }

        let mut merged: HashMap<String, u64> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (provider_name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "load provider task panicked");
                    continue;
                }
            };
            match result {
                Ok(load) => {
                    debug!(provider = %provider_name, entries = load.len(), "provider reported load");
                    for (external_name, tickets) in load {
                        let canonical = self
                            .aliases
                            .get(&external_name)
                            .cloned()
                            .unwrap_or(external_name);
                        *merged.entry(canonical).or_insert(0) += tickets;
                    }
                }
                Err(e) => {
                    // Partial failure: report and keep the other providers'
                    // contributions.
                    warn!(provider = %provider_name, error = %e, "load provider failed");
                }
            }
        }
        merged
    }

    /// Resolve merged names to known processor ids.
    ///
    /// `index` maps canonical processor names to ids (built from the
    /// cycle's candidate list). Names with no entry are dropped with a
    /// warning — load for unknown processors must never invent one.
    pub fn resolve(
        by_name: HashMap<String, u64>,
        index: &HashMap<String, ProcessorId>,
    ) -> BTreeMap<ProcessorId, u64> {
        let mut resolved = BTreeMap::new();
        for (name, tickets) in by_name {
            match index.get(&name) {
                Some(id) => {
                    *resolved.entry(*id).or_insert(0) += tickets;
                }
                None => {
                    warn!(
                        upstream_name = %name,
                        tickets,
                        "pending load for unknown processor dropped"
                    );
                }
            }
        }
        resolved
    }

    /// Fetch, merge, and resolve in one call.
    pub async fn fetch_pending_load(
        &self,
        index: &HashMap<String, ProcessorId>,
    ) -> BTreeMap<ProcessorId, u64> {
        let by_name = self.fetch_by_name().await;
        Self::resolve(by_name, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticLoadProvider;
    use async_trait::async_trait;

    struct FailingProvider;

    #[async_trait]
    impl LoadProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_pending_load(&self) -> anyhow::Result<HashMap<String, u64>> {
            anyhow::bail!("upstream unreachable")
        }
    }

    fn static_provider(name: &str, entries: &[(&str, u64)]) -> Arc<dyn LoadProvider> {
        Arc::new(StaticLoadProvider::new(
            name,
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        ))
    }

    #[tokio::test]
    async fn merges_same_name_across_providers() {
        let mut agg = LoadAggregator::new();
        agg.register(static_provider("a", &[("invoices", 10), ("claims", 2)]));
        agg.register(static_provider("b", &[("invoices", 5)]));

        let merged = agg.fetch_by_name().await;
        assert_eq!(merged.get("invoices"), Some(&15));
        assert_eq!(merged.get("claims"), Some(&2));
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_block_the_rest() {
        let mut agg = LoadAggregator::new();
        agg.register(Arc::new(FailingProvider));
        agg.register(static_provider("b", &[("invoices", 7)]));

        let merged = agg.fetch_by_name().await;
        assert_eq!(merged.get("invoices"), Some(&7));
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn aliases_apply_before_merging() {
        let mut agg = LoadAggregator::new().with_alias_map(HashMap::from([(
            "upstream-invoices".to_string(),
            "invoices".to_string(),
        )]));
        agg.register(static_provider("a", &[("upstream-invoices", 4)]));
        agg.register(static_provider("b", &[("invoices", 6)]));

        let merged = agg.fetch_by_name().await;
        assert_eq!(merged.get("invoices"), Some(&10));
        assert!(!merged.contains_key("upstream-invoices"));
    }

    #[test]
    fn unresolved_names_are_dropped() {
        let index = HashMap::from([("invoices".to_string(), 1_i64)]);
        let by_name = HashMap::from([
            ("invoices".to_string(), 10_u64),
            ("ghost".to_string(), 99_u64),
        ]);

        let resolved = LoadAggregator::resolve(by_name, &index);
        assert_eq!(resolved.get(&1), Some(&10));
        assert_eq!(resolved.len(), 1);
    }

    #[tokio::test]
    async fn empty_aggregator_reports_no_load() {
        let agg = LoadAggregator::new();
        assert!(agg.fetch_by_name().await.is_empty());
    }
}
