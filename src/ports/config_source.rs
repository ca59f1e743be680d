use crate::domain::{ProxySettings, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Port for discovering the proxy configuration of the system or network
#[async_trait]
pub trait ConfigSourcePort: Send + Sync {
    /// Current configuration
    ///
    /// Fails with `ProxyError::ConfigUnavailable` when nothing can be determined.
    async fn current_configuration(&self) -> Result<ProxySettings>;

    /// Register an observer for configuration changes
    ///
    /// Observers are called at most once per actual change.
    fn add_observer(&self, observer: Arc<dyn ConfigObserver>);
}

pub trait ConfigObserver: Send + Sync {
    fn on_configuration_changed(&self, settings: ProxySettings);
}
