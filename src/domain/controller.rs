use std::fmt;
use std::sync::Arc;
use url::Url;

use super::{
    ConfigId, PendingRequestQueue, ProxyConfig, ProxyError, ProxyRules, ProxySettings, ResolutionResult, Result,
    RetryPolicy, RetryRegistry,
};

/// Observable phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    None,
    WaitingForConfig,
    WaitingForResolverInit,
    Ready,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::None => "NONE",
            StateKind::WaitingForConfig => "WAITING_FOR_CONFIG",
            StateKind::WaitingForResolverInit => "WAITING_FOR_RESOLVER_INIT",
            StateKind::Ready => "READY",
        };
        f.write_str(name)
    }
}

/// How requests are answered once the controller is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveMode {
    /// Ask the resolver, which runs the script loaded from `script_url`.
    Resolver { script_url: Url },
    /// Answer from manual rules.
    Rules(ProxyRules),
    /// Everything goes direct. `degraded` is set when this is a fallback
    /// rather than what the configuration asked for.
    Direct { degraded: bool },
}

impl EffectiveMode {
    pub fn is_degraded(&self) -> bool {
        matches!(self, EffectiveMode::Direct { degraded: true })
    }
}

#[derive(Debug, Clone)]
pub enum ControllerState {
    None,
    WaitingForConfig,
    WaitingForResolverInit {
        config: Arc<ProxyConfig>,
    },
    Ready {
        config: Option<Arc<ProxyConfig>>,
        mode: EffectiveMode,
    },
}

impl ControllerState {
    pub fn kind(&self) -> StateKind {
        match self {
            ControllerState::None => StateKind::None,
            ControllerState::WaitingForConfig => StateKind::WaitingForConfig,
            ControllerState::WaitingForResolverInit { .. } => StateKind::WaitingForResolverInit,
            ControllerState::Ready { .. } => StateKind::Ready,
        }
    }
}

/// Result of priming the resolver.
#[derive(Debug, Clone)]
pub enum InitOutcome {
    /// The script fetched from `url` is loaded.
    Script { url: Url },
    /// Every script source failed; `error` is the last failure.
    Exhausted { error: ProxyError },
}

/// Work the service has to start after a transition.
#[derive(Debug, Clone)]
pub enum Action {
    FetchConfig { epoch: u64 },
    InitResolver { epoch: u64, config: Arc<ProxyConfig> },
    /// The controller became ready; queued requests can run.
    Dispatch,
}

/// State machine that acquires configuration and primes the resolver.
/// Owns the pending requests and the bad-proxy registry.
#[derive(Debug)]
pub struct ConfigurationController {
    state: ControllerState,
    epoch: u64,
    last_config_id: ConfigId,
    queue: PendingRequestQueue,
    retry: RetryRegistry,
}

impl ConfigurationController {
    pub fn new(policy: RetryPolicy) -> Self {
        let mut queue = PendingRequestQueue::new();
        queue.suspend_all();
        Self {
            state: ControllerState::None,
            epoch: 0,
            last_config_id: ConfigId::INVALID,
            queue,
            retry: RetryRegistry::new(policy),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Bumped on every reset; work started in an older epoch is stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> Option<&Arc<ProxyConfig>> {
        match &self.state {
            ControllerState::WaitingForResolverInit { config } => Some(config),
            ControllerState::Ready { config, .. } => config.as_ref(),
            _ => None,
        }
    }

    pub fn config_id(&self) -> ConfigId {
        self.config().map(|c| c.id).unwrap_or(ConfigId::INVALID)
    }

    pub fn mode(&self) -> Option<&EffectiveMode> {
        match &self.state {
            ControllerState::Ready { mode, .. } => Some(mode),
            _ => None,
        }
    }

    pub fn queue(&self) -> &PendingRequestQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut PendingRequestQueue {
        &mut self.queue
    }

    pub fn retry(&self) -> &RetryRegistry {
        &self.retry
    }

    pub fn retry_mut(&mut self) -> &mut RetryRegistry {
        &mut self.retry
    }

    /// Go back to `NONE`: stale work is invalidated and pending requests
    /// are suspended. Returns the previous phase.
    pub fn reset(&mut self) -> StateKind {
        let previous = self.kind();
        self.epoch += 1;
        self.state = ControllerState::None;
        self.queue.suspend_all();
        tracing::debug!("Proxy controller reset from {}", previous);
        previous
    }

    /// Called for every resolution request: start acquiring configuration
    /// if none is held. A source that failed before is asked again.
    pub fn on_resolve_request(&mut self) -> Option<Action> {
        match self.state {
            ControllerState::None => Some(self.request_config()),
            ControllerState::Ready { config: None, .. } => {
                self.reset();
                Some(self.request_config())
            }
            _ => None,
        }
    }

    /// Drop the held configuration and fetch it again. Bad proxies are kept.
    pub fn force_reload(&mut self) -> Action {
        self.reset();
        self.request_config()
    }

    pub fn on_network_changed(&mut self) -> Option<Action> {
        match self.state {
            // nothing was ever loaded, the next request fetches fresh
            ControllerState::None => None,
            ControllerState::WaitingForConfig => {
                self.epoch += 1;
                Some(Action::FetchConfig { epoch: self.epoch })
            }
            _ => Some(self.force_reload()),
        }
    }

    pub fn on_config_changed(&mut self, settings: ProxySettings) -> Option<Action> {
        match &self.state {
            ControllerState::None => return None,
            ControllerState::WaitingForConfig => {}
            ControllerState::WaitingForResolverInit { config }
            | ControllerState::Ready {
                config: Some(config), ..
            } => {
                if config.same_content(&settings) {
                    tracing::debug!("Ignoring unchanged proxy configuration {}", config.id);
                    return None;
                }
                self.reset();
                self.state = ControllerState::WaitingForConfig;
            }
            ControllerState::Ready { config: None, .. } => {
                self.reset();
                self.state = ControllerState::WaitingForConfig;
            }
        }

        self.epoch += 1;
        Some(self.apply(settings))
    }

    pub fn on_config_fetched(&mut self, epoch: u64, fetched: Result<ProxySettings>) -> Option<Action> {
        if epoch != self.epoch || self.kind() != StateKind::WaitingForConfig {
            return None;
        }

        match fetched {
            Ok(settings) => Some(self.apply(settings)),
            Err(e) => {
                tracing::warn!("Proxy configuration unavailable, using direct connections: {}", e);
                Some(self.set_ready(None, EffectiveMode::Direct { degraded: true }))
            }
        }
    }

    pub fn on_init_complete(&mut self, epoch: u64, outcome: InitOutcome) -> Option<Action> {
        if epoch != self.epoch {
            return None;
        }
        let ControllerState::WaitingForResolverInit { config } = &self.state else {
            return None;
        };
        let config = config.clone();

        let mode = match outcome {
            InitOutcome::Script { url } => EffectiveMode::Resolver { script_url: url },
            InitOutcome::Exhausted { error } => match config.settings.fallback_rules() {
                Some(rules) if !rules.is_empty() => {
                    tracing::warn!("PAC initialization failed ({}), falling back to manual rules", error);
                    EffectiveMode::Rules(rules.clone())
                }
                _ => {
                    tracing::warn!("PAC initialization failed ({}), falling back to direct", error);
                    EffectiveMode::Direct { degraded: true }
                }
            },
        };
        Some(self.set_ready(Some(config), mode))
    }

    /// Answer `url` without the resolver, if the current mode allows it.
    /// The bad-proxy filter is not applied.
    pub fn try_complete_synchronously(&self, url: &Url) -> Option<ResolutionResult> {
        let ControllerState::Ready { mode, .. } = &self.state else {
            return None;
        };
        let proxies = match mode {
            EffectiveMode::Resolver { .. } => return None,
            EffectiveMode::Rules(rules) => rules.select(url),
            EffectiveMode::Direct { .. } => Vec::new(),
        };
        Some(ResolutionResult::new(proxies, self.config_id()))
    }

    fn request_config(&mut self) -> Action {
        self.state = ControllerState::WaitingForConfig;
        tracing::debug!("Proxy controller waiting for configuration");
        Action::FetchConfig { epoch: self.epoch }
    }

    fn apply(&mut self, settings: ProxySettings) -> Action {
        self.last_config_id = self.last_config_id.next();
        let config = Arc::new(ProxyConfig::new(self.last_config_id, settings));
        tracing::info!("Applying {} proxy configuration {}", config.settings.name(), config.id);

        match &config.settings {
            ProxySettings::AutoDetect { .. } | ProxySettings::PacUrl { .. } => {
                self.state = ControllerState::WaitingForResolverInit { config: config.clone() };
                Action::InitResolver {
                    epoch: self.epoch,
                    config,
                }
            }
            ProxySettings::Manual { rules } => {
                let mode = EffectiveMode::Rules(rules.clone());
                self.set_ready(Some(config), mode)
            }
            ProxySettings::Direct => self.set_ready(Some(config), EffectiveMode::Direct { degraded: false }),
        }
    }

    fn set_ready(&mut self, config: Option<Arc<ProxyConfig>>, mode: EffectiveMode) -> Action {
        self.state = ControllerState::Ready { config, mode };
        let waiting = self.queue.resume_all();
        tracing::debug!("Proxy controller ready, resuming {} request(s)", waiting);
        Action::Dispatch
    }
}
