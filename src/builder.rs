use std::sync::Arc;
use std::time::Duration;

use crate::adapters::script_fetcher::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_SCRIPT_BYTES};
use crate::adapters::{FixedConfigSource, NullConfigSource, PacProxyResolver, ReqwestScriptFetcher};
use crate::config::NanopacConfig;
use crate::domain::{ProxyService, ProxySettings, Result, ServiceSettings};
use crate::ports::{ConfigSourcePort, ProxyResolverPort, ScriptFetcherPort, StatusListener};

/// Wires ports into a [`ProxyService`]. Ports that are not set get the
/// stock adapters: no configuration, the PAC evaluator and the HTTP fetcher.
pub struct ProxyServiceBuilder {
    config_source: Option<Arc<dyn ConfigSourcePort>>,
    resolver: Option<Arc<dyn ProxyResolverPort>>,
    fetcher: Option<Arc<dyn ScriptFetcherPort>>,
    listeners: Vec<Arc<dyn StatusListener>>,
    settings: ServiceSettings,
    fetch_timeout: Duration,
    max_script_bytes: usize,
    resolver_threads: usize,
}

impl Default for ProxyServiceBuilder {
    fn default() -> Self {
        Self {
            config_source: None,
            resolver: None,
            fetcher: None,
            listeners: Vec::new(),
            settings: ServiceSettings::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_script_bytes: DEFAULT_MAX_SCRIPT_BYTES,
            resolver_threads: 1,
        }
    }
}

impl ProxyServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service tunables from the configuration file. The configuration
    /// source itself is left to the caller.
    pub fn from_config(config: &NanopacConfig) -> Self {
        Self {
            settings: config.service_settings(),
            fetch_timeout: config.fetch_timeout(),
            max_script_bytes: config.service.max_script_bytes,
            resolver_threads: config.service.resolver_threads,
            ..Self::default()
        }
    }

    pub fn config_source(mut self, source: Arc<dyn ConfigSourcePort>) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ProxyResolverPort>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn script_fetcher(mut self, fetcher: Arc<dyn ScriptFetcherPort>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start the service. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ProxyService> {
        let fetcher: Arc<dyn ScriptFetcherPort> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ReqwestScriptFetcher::new(self.fetch_timeout, self.max_script_bytes)?),
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(PacProxyResolver::new(self.resolver_threads)));
        let config_source = self.config_source.unwrap_or_else(|| Arc::new(NullConfigSource));

        let service = ProxyService::new(config_source, resolver, fetcher, self.settings);
        for listener in self.listeners {
            service.add_listener(listener);
        }
        Ok(service)
    }
}

impl ProxyService {
    /// Service that always uses `settings`
    pub fn fixed(settings: ProxySettings) -> Result<Self> {
        ProxyServiceBuilder::new()
            .config_source(Arc::new(FixedConfigSource::new(settings)))
            .build()
    }

    /// Service without any configuration; everything goes direct
    pub fn null() -> Result<Self> {
        ProxyServiceBuilder::new().build()
    }
}
