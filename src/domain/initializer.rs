use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::{InitOutcome, ProxyError, ProxySettings, Result};
use crate::ports::{ProxyResolverPort, ScriptFetcherPort};

pub const DEFAULT_WPAD_URL: &str = "http://wpad/wpad.dat";

/// Primes the resolver for a configuration: WPAD first when auto-detecting,
/// then the explicit PAC URL. The first script that loads wins.
pub struct ResolverInitializer {
    fetcher: Arc<dyn ScriptFetcherPort>,
    resolver: Arc<dyn ProxyResolverPort>,
    wpad_url: Url,
}

impl ResolverInitializer {
    pub fn new(fetcher: Arc<dyn ScriptFetcherPort>, resolver: Arc<dyn ProxyResolverPort>, wpad_url: Url) -> Self {
        Self {
            fetcher,
            resolver,
            wpad_url,
        }
    }

    pub fn script_sources(&self, settings: &ProxySettings) -> Vec<Url> {
        match settings {
            ProxySettings::AutoDetect { pac_url, .. } => std::iter::once(self.wpad_url.clone())
                .chain(pac_url.iter().cloned())
                .collect(),
            ProxySettings::PacUrl { pac_url, .. } => vec![pac_url.clone()],
            ProxySettings::Direct | ProxySettings::Manual { .. } => Vec::new(),
        }
    }

    pub async fn run(&self, settings: &ProxySettings) -> InitOutcome {
        let mut last_error = ProxyError::ResolverInitFailed("no PAC script source configured".into());

        for url in self.script_sources(settings) {
            match self.load(&url).await {
                Ok(()) => {
                    info!("PAC script from {} is ready", url);
                    return InitOutcome::Script { url };
                }
                Err(e) => {
                    warn!("Could not use PAC script from {}: {}", url, e);
                    last_error = e;
                }
            }
        }

        InitOutcome::Exhausted { error: last_error }
    }

    async fn load(&self, url: &Url) -> Result<()> {
        let script = self.fetcher.fetch_script(url).await?;
        if script.body.trim().is_empty() {
            return Err(ProxyError::ResolverInitFailed(format!("PAC script at {} is empty", url)));
        }
        self.resolver.initialize(&script).await
    }
}
