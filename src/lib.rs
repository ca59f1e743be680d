//! Proxy resolution for URLs: acquires the proxy configuration, primes a
//! PAC evaluator, queues requests until the answer can be computed, and
//! steers callers away from proxies that recently failed.

pub mod adapters;
pub mod builder;
pub mod config;
pub mod domain;
pub mod ports;

pub use builder::ProxyServiceBuilder;
pub use config::NanopacConfig;
pub use domain::{
    ConnectionCode, PendingResolution, ProxyError, ProxyServer, ProxyService, ProxySettings, ResolutionResult,
    ServiceStatus, StateKind, SyncProxyService,
};
