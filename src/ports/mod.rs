pub mod config_source;
pub mod listener;
pub mod resolver;
pub mod script_fetcher;

pub use config_source::{ConfigObserver, ConfigSourcePort};
pub use listener::{NetworkChangeObserver, StatusListener};
pub use resolver::ProxyResolverPort;
pub use script_fetcher::ScriptFetcherPort;
