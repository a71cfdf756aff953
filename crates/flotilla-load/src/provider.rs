//! LoadProvider trait and the in-tree provider implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

/// One upstream source of pending-ticket counts.
///
/// Returns pending tickets keyed by the *external* processor name the
/// upstream system uses; the aggregator handles alias mapping and id
/// resolution. Implementations for remote systems (SQL, HTTP, SSH
/// tunnels) live outside this workspace; in-tree providers cover static
/// and file-backed sources.
#[async_trait]
pub trait LoadProvider: Send + Sync {
    /// Short provider name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Fetch the current pending load. One failing provider must not
    /// block the others — the aggregator isolates errors per provider.
    async fn fetch_pending_load(&self) -> anyhow::Result<HashMap<String, u64>>;
}

impl std::fmt::Debug for dyn LoadProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadProvider")
            .field("name", &self.name())
            .finish()
    }
}

/// Fixed in-memory load, for tests and dry runs.
pub struct StaticLoadProvider {
    name: String,
    load: HashMap<String, u64>,
}

impl StaticLoadProvider {
    pub fn new(name: impl Into<String>, load: HashMap<String, u64>) -> Self {
        Self {
            name: name.into(),
            load,
        }
    }
}

#[async_trait]
impl LoadProvider for StaticLoadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_pending_load(&self) -> anyhow::Result<HashMap<String, u64>> {
        Ok(self.load.clone())
    }
}

/// Reads a TOML `name = tickets` map from a file on every fetch.
///
/// External collectors can drop a fresh file each interval; the provider
/// always reports the file's current content.
pub struct FileLoadProvider {
    name: String,
    path: PathBuf,
}

impl FileLoadProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self { name, path }
    }
}

#[async_trait]
impl LoadProvider for FileLoadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_pending_load(&self) -> anyhow::Result<HashMap<String, u64>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading load file {}", self.path.display()))?;
        let load: HashMap<String, u64> = toml::from_str(&raw)
            .with_context(|| format!("parsing load file {}", self.path.display()))?;
        Ok(load)
    }
}
