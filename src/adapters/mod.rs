pub mod config_source;
pub mod network;
pub mod pac_resolver;
pub mod script_fetcher;
pub mod status_log;
pub mod watch;

pub use config_source::*;
pub use network::ResolvConfWatcher;
pub use pac_resolver::PacProxyResolver;
pub use script_fetcher::ReqwestScriptFetcher;
pub use status_log::LoggingStatusListener;
pub use watch::FileWatch;
