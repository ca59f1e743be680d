use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ConfigObservers, LastSettings};
use crate::domain::{ProxyError, ProxySettings, Result};
use crate::ports::{ConfigObserver, ConfigSourcePort};

/// Configuration held in memory, replaced with [`FixedConfigSource::set`]
pub struct FixedConfigSource {
    current: LastSettings,
    observers: ConfigObservers,
}

impl FixedConfigSource {
    pub fn new(settings: ProxySettings) -> Self {
        let current = LastSettings::default();
        current.replace(&settings);
        Self {
            current,
            observers: ConfigObservers::default(),
        }
    }

    /// Replace the configuration. Observers are told only if it changed.
    pub fn set(&self, settings: ProxySettings) {
        if self.current.replace(&settings) {
            debug!("Fixed proxy configuration changed to {}", settings.name());
            self.observers.notify(&settings);
        }
    }
}

#[async_trait]
impl ConfigSourcePort for FixedConfigSource {
    async fn current_configuration(&self) -> Result<ProxySettings> {
        Ok(self.current.get().unwrap_or_default())
    }

    fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.observers.add(observer);
    }
}

/// Source that never has a configuration
pub struct NullConfigSource;

#[async_trait]
impl ConfigSourcePort for NullConfigSource {
    async fn current_configuration(&self) -> Result<ProxySettings> {
        Err(ProxyError::ConfigUnavailable("no configuration source".into()))
    }

    fn add_observer(&self, _observer: Arc<dyn ConfigObserver>) {}
}
