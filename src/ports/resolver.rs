use crate::domain::{PacScript, ProxyServer, Result};
use async_trait::async_trait;
use url::Url;

/// Port for the engine that runs PAC scripts
#[async_trait]
pub trait ProxyResolverPort: Send + Sync {
    /// Load `script`, replacing whatever script was loaded before
    async fn initialize(&self, script: &PacScript) -> Result<()>;

    /// Run the loaded script for `target_url`
    ///
    /// Returns the raw candidate list; an empty list means direct.
    async fn get_proxy_for_url(&self, target_url: &Url) -> Result<Vec<ProxyServer>>;

    /// How many `get_proxy_for_url` calls may run at the same time
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Drop caches that can be rebuilt
    async fn purge_memory(&self) {}
}
