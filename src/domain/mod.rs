pub mod context;
pub mod controller;
pub mod errors;
pub mod initializer;
pub mod models;
pub mod queue;
pub mod retry;
pub mod rules;
pub mod service;
pub mod status;
pub mod sync_bridge;

pub use context::in_service_context;
pub use controller::{Action, ConfigurationController, ControllerState, EffectiveMode, InitOutcome, StateKind};
pub use errors::*;
pub use initializer::{ResolverInitializer, DEFAULT_WPAD_URL};
pub use models::*;
pub use queue::{Dispatch, PendingRequest, PendingRequestQueue, Reply, RequestId, RequestKind};
pub use retry::{RetryEntry, RetryPolicy, RetryRegistry};
pub use rules::{BypassRule, ProxyRules};
pub use service::{PendingResolution, ProxyService, ServiceObserver, ServiceSettings, ServiceSnapshot};
pub use status::{ConnectionCode, ListenerId, ServiceStatus, StatusBoard};
pub use sync_bridge::SyncProxyService;
