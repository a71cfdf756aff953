//! ProviderRegistry — build load providers from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::provider::{FileLoadProvider, LoadProvider, StaticLoadProvider};

/// One provider entry from the daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Registered provider kind, e.g. "file" or "static".
    pub kind: String,
    /// Kind-specific options.
    #[serde(default)]
    pub options: toml::Table,
}

type Factory = Box<dyn Fn(&toml::Table) -> anyhow::Result<Arc<dyn LoadProvider>> + Send + Sync>;

/// Maps provider kind names to constructors.
///
/// Deployments enable providers by kind in configuration; external
/// crates can register additional kinds before building.
pub struct ProviderRegistry {
    factories: HashMap<String, Factory>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the in-tree provider kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("file", |options| {
            let path = options
                .get("path")
                .and_then(|v| v.as_str())
                .context("file provider requires a `path` option")?;
            Ok(Arc::new(FileLoadProvider::new(path)) as Arc<dyn LoadProvider>)
        });
        registry.register("static", |options| {
            let mut load = HashMap::new();
            if let Some(entries) = options.get("load").and_then(|v| v.as_table()) {
                for (name, tickets) in entries {
                    let tickets = tickets
                        .as_integer()
                        .with_context(|| format!("static load for `{name}` must be an integer"))?;
                    load.insert(name.clone(), tickets.max(0) as u64);
                }
            }
            Ok(Arc::new(StaticLoadProvider::new("static", load)) as Arc<dyn LoadProvider>)
        });
        registry
    }

    /// Register a provider kind.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&toml::Table) -> anyhow::Result<Arc<dyn LoadProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Build a provider from one configuration entry.
    pub fn build(&self, config: &ProviderConfig) -> anyhow::Result<Arc<dyn LoadProvider>> {
        match self.factories.get(&config.kind) {
            Some(factory) => factory(&config.options)
                .with_context(|| format!("building `{}` load provider", config.kind)),
            None => bail!("unknown load provider kind: {}", config.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_static_provider_from_config() {
        let registry = ProviderRegistry::with_defaults();
        let config: ProviderConfig = toml::from_str(
            r#"
            kind = "static"
            [options.load]
            invoices = 12
            "#,
        )
        .unwrap();

        let provider = registry.build(&config).unwrap();
        assert_eq!(provider.name(), "static");
    }

    #[test]
    fn builds_file_provider_from_config() {
        let registry = ProviderRegistry::with_defaults();
        let config: ProviderConfig = toml::from_str(
            r#"
            kind = "file"
            [options]
            path = "/var/lib/flotilla/load.toml"
            "#,
        )
        .unwrap();

        let provider = registry.build(&config).unwrap();
        assert!(provider.name().starts_with("file:"));
    }

    #[test]
    fn file_provider_requires_path() {
        let registry = ProviderRegistry::with_defaults();
        let config = ProviderConfig {
            kind: "file".to_string(),
            options: toml::Table::new(),
        };
        assert!(registry.build(&config).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let config = ProviderConfig {
            kind: "mysql-ssh".to_string(),
            options: toml::Table::new(),
        };
        let err = registry.build(&config).unwrap_err();
        assert!(err.to_string().contains("unknown load provider kind"));
    }

    #[test]
    fn external_kinds_can_be_registered() {
        let mut registry = ProviderRegistry::empty();
        registry.register("custom", |_| {
            Ok(Arc::new(StaticLoadProvider::new("custom", HashMap::new()))
                as Arc<dyn LoadProvider>)
        });
        let config = ProviderConfig {
            kind: "custom".to_string(),
            options: toml::Table::new(),
        };
        assert!(registry.build(&config).is_ok());
    }
}
