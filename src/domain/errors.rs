use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The configuration source could not hand out a configuration.
    #[error("Proxy configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// Fetching or compiling the PAC script failed.
    #[error("Proxy resolver initialization failed: {0}")]
    ResolverInitFailed(String),

    /// The resolver could not produce a proxy list for one URL.
    #[error("Proxy resolution failed: {0}")]
    ResolveFailed(String),

    #[error("No more proxies to try")]
    AllProxiesExhausted,

    #[error("Failed to fetch PAC script from {url}: {reason}")]
    ScriptFetchFailed { url: String, reason: String },

    #[error("PAC script download from {0} requires authentication")]
    ScriptUnauthorized(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Proxy service has stopped")]
    ServiceStopped,

    #[error("Blocking call issued from the proxy service context or a runtime thread")]
    BlockingInServiceContext,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn fetch_failed(url: impl ToString, reason: impl ToString) -> Self {
        ProxyError::ScriptFetchFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
