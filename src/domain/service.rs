use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use url::Url;

use super::context::ServiceScope;
use super::initializer::{ResolverInitializer, DEFAULT_WPAD_URL};
use super::{
    Action, ConfigurationController, ConnectionCode, Dispatch, InitOutcome, ListenerId, PendingRequest, ProxyConfig,
    ProxyError, ProxyServer, ProxySettings, Reply, RequestId, RequestKind, ResolutionResult, Result, RetryEntry,
    RetryPolicy, ServiceStatus, StateKind, StatusBoard,
};
use crate::ports::{
    ConfigObserver, ConfigSourcePort, NetworkChangeObserver, ProxyResolverPort, ScriptFetcherPort, StatusListener,
};

/// Tunables of the service itself; the ports bring their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub wpad_url: Url,
    pub retry: RetryPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            wpad_url: Url::parse(DEFAULT_WPAD_URL).expect("DEFAULT_WPAD_URL is a valid URL"),
            retry: RetryPolicy::default(),
        }
    }
}

/// Consistent view of the service, published after every command.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub state: StateKind,
    pub config: Option<Arc<ProxyConfig>>,
    pub status: ServiceStatus,
    pub pending: usize,
    pub bad_proxies: usize,
}

impl ServiceSnapshot {
    fn initial() -> Self {
        Self {
            state: StateKind::None,
            config: None,
            status: ServiceStatus::default(),
            pending: 0,
            bad_proxies: 0,
        }
    }

    fn same_as(&self, other: &ServiceSnapshot) -> bool {
        self.state == other.state
            && self.config.as_ref().map(|c| c.id) == other.config.as_ref().map(|c| c.id)
            && self.status == other.status
            && self.pending == other.pending
            && self.bad_proxies == other.bad_proxies
    }
}

enum Command {
    Resolve {
        id: RequestId,
        url: Url,
        reply: Reply,
        span: Span,
    },
    Reconsider {
        id: RequestId,
        url: Url,
        prior: ResolutionResult,
        reply: Reply,
        span: Span,
    },
    Cancel {
        id: RequestId,
    },
    ForceReload,
    PurgeMemory,
    ClearRetryCache,
    AddListener {
        id: ListenerId,
        listener: Arc<dyn StatusListener>,
    },
    RemoveListener {
        id: ListenerId,
    },
    RetryInfo {
        reply: oneshot::Sender<Vec<(ProxyServer, RetryEntry)>>,
    },
    ConfigChanged(ProxySettings),
    NetworkChanged,
    ConfigFetched {
        epoch: u64,
        result: Result<ProxySettings>,
    },
    ResolverReady {
        epoch: u64,
        outcome: InitOutcome,
    },
    Resolved {
        id: RequestId,
        epoch: u64,
        result: Result<Vec<ProxyServer>>,
    },
}

/// Handle to the proxy resolution service.
///
/// Every operation is forwarded to a single task that owns the
/// configuration state, the pending requests and the bad-proxy registry.
/// The task stops once every handle and every pending resolution is gone.
#[derive(Clone)]
pub struct ProxyService {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ServiceSnapshot>,
}

impl ProxyService {
    /// Start the service on the current tokio runtime.
    pub fn new(
        config_source: Arc<dyn ConfigSourcePort>,
        resolver: Arc<dyn ProxyResolverPort>,
        fetcher: Arc<dyn ScriptFetcherPort>,
        settings: ServiceSettings,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ServiceSnapshot::initial());

        config_source.add_observer(Arc::new(ServiceObserver {
            commands: commands.downgrade(),
        }));

        let context = ServiceContext {
            controller: ConfigurationController::new(settings.retry),
            status: StatusBoard::new(),
            initializer: Arc::new(ResolverInitializer::new(fetcher, resolver.clone(), settings.wpad_url)),
            config_source,
            resolver,
            commands: receiver,
            loopback: commands.downgrade(),
            snapshot: snapshot_tx,
            config_task: None,
            init_task: None,
        };
        tokio::spawn(ServiceScope::new(context.run()));

        Self { commands, snapshot }
    }

    pub fn resolve(&self, url: Url) -> PendingResolution {
        let id = RequestId::new();
        let span = info_span!("resolve", request = %id, url = %url);
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Resolve { id, url, reply, span });
        PendingResolution::new(id, receiver, self.commands.clone())
    }

    /// Report that connecting through `prior.first()` failed and get the
    /// next candidates for `url`.
    pub fn reconsider_after_error(&self, url: Url, prior: ResolutionResult) -> PendingResolution {
        let id = RequestId::new();
        let span = info_span!("reconsider", request = %id, url = %url, failed = %prior.first());
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Reconsider {
            id,
            url,
            prior,
            reply,
            span,
        });
        PendingResolution::new(id, receiver, self.commands.clone())
    }

    /// Cancel a pending request. Unknown or finished requests are ignored.
    pub fn cancel(&self, id: RequestId) {
        self.send(Command::Cancel { id });
    }

    /// Drop the held configuration and fetch it again. Bad proxies are kept.
    pub fn force_reload(&self) {
        self.send(Command::ForceReload);
    }

    pub fn purge_memory(&self) {
        self.send(Command::PurgeMemory);
    }

    pub fn clear_retry_cache(&self) {
        self.send(Command::ClearRetryCache);
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        let id = ListenerId::new();
        self.send(Command::AddListener { id, listener });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.send(Command::RemoveListener { id });
    }

    pub async fn retry_info(&self) -> Result<Vec<(ProxyServer, RetryEntry)>> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::RetryInfo { reply });
        receiver.await.map_err(|_| ProxyError::ServiceStopped)
    }

    pub fn on_configuration_changed(&self, settings: ProxySettings) {
        self.send(Command::ConfigChanged(settings));
    }

    pub fn on_network_changed(&self) {
        self.send(Command::NetworkChanged);
    }

    /// Observer that forwards notifications without keeping the service alive.
    pub fn observer(&self) -> Arc<ServiceObserver> {
        Arc::new(ServiceObserver {
            commands: self.commands.downgrade(),
        })
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> ServiceStatus {
        self.snapshot.borrow().status
    }

    pub fn state(&self) -> StateKind {
        self.snapshot.borrow().state
    }

    pub fn config(&self) -> Option<Arc<ProxyConfig>> {
        self.snapshot.borrow().config.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.snapshot.borrow().pending
    }

    /// Wait until the published snapshot satisfies `condition`.
    pub async fn wait_for<F>(&self, mut condition: F) -> Result<ServiceSnapshot>
    where
        F: FnMut(&ServiceSnapshot) -> bool,
    {
        let mut snapshot = self.snapshot.clone();
        let current = snapshot
            .wait_for(|s| condition(s))
            .await
            .map_err(|_| ProxyError::ServiceStopped)?;
        Ok(current.clone())
    }

    pub async fn wait_for_state(&self, state: StateKind) -> Result<()> {
        self.wait_for(|s| s.state == state).await.map(|_| ())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Proxy service is gone, dropping command");
        }
    }
}

/// Forwards configuration and network notifications to a running service.
pub struct ServiceObserver {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl ServiceObserver {
    fn forward(&self, command: Command) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(command);
        }
    }
}

impl ConfigObserver for ServiceObserver {
    fn on_configuration_changed(&self, settings: ProxySettings) {
        self.forward(Command::ConfigChanged(settings));
    }
}

impl NetworkChangeObserver for ServiceObserver {
    fn on_network_changed(&self) {
        self.forward(Command::NetworkChanged);
    }
}

/// Result of a `resolve` or `reconsider_after_error` call.
///
/// Dropping it before it finished cancels the request.
#[must_use = "dropping a PendingResolution cancels the request"]
pub struct PendingResolution {
    id: RequestId,
    receiver: oneshot::Receiver<Result<ResolutionResult>>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl PendingResolution {
    fn new(
        id: RequestId,
        receiver: oneshot::Receiver<Result<ResolutionResult>>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            receiver,
            commands,
            finished: false,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The result, if it is already there. Returns `None` while the request
    /// is running and after the result was taken.
    pub fn try_result(&mut self) -> Option<Result<ResolutionResult>> {
        if self.finished {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.finished = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.finished = true;
                Some(Err(self.closed_error()))
            }
        }
    }

    pub fn cancel(mut self) {
        self.send_cancel();
    }

    fn send_cancel(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.commands.send(Command::Cancel { id: self.id });
        }
    }

    fn closed_error(&self) -> ProxyError {
        if self.commands.is_closed() {
            ProxyError::ServiceStopped
        } else {
            ProxyError::Cancelled
        }
    }
}

impl Future for PendingResolution {
    type Output = Result<ResolutionResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.finished {
            return Poll::Ready(Err(ProxyError::Cancelled));
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.finished = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                self.finished = true;
                Poll::Ready(Err(self.closed_error()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResolution {
    fn drop(&mut self) {
        self.send_cancel();
    }
}

fn init_failure_code(error: &ProxyError) -> ConnectionCode {
    match error {
        ProxyError::ScriptUnauthorized(_) => ConnectionCode::AuthError,
        ProxyError::ScriptFetchFailed { .. } => ConnectionCode::IoError,
        _ => ConnectionCode::ServerError,
    }
}

struct ServiceContext {
    controller: ConfigurationController,
    status: StatusBoard,
    config_source: Arc<dyn ConfigSourcePort>,
    resolver: Arc<dyn ProxyResolverPort>,
    initializer: Arc<ResolverInitializer>,
    commands: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::WeakUnboundedSender<Command>,
    snapshot: watch::Sender<ServiceSnapshot>,
    config_task: Option<AbortHandle>,
    init_task: Option<AbortHandle>,
}

impl ServiceContext {
    async fn run(mut self) {
        debug!("Proxy service started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            self.publish();
        }
        self.abort_background();
        debug!("Proxy service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Resolve { id, url, reply, span } => self.submit(id, url, RequestKind::Resolve, reply, span),
            Command::Reconsider {
                id,
                url,
                prior,
                reply,
                span,
            } => self.reconsider(id, url, prior, reply, span),
            Command::Cancel { id } => self.cancel(id),
            Command::ForceReload => {
                info!("Reloading proxy configuration");
                let action = self.controller.force_reload();
                self.after_reset();
                self.perform(action);
            }
            Command::PurgeMemory => {
                let resolver = self.resolver.clone();
                tokio::spawn(async move { resolver.purge_memory().await });
            }
            Command::ClearRetryCache => {
                debug!("Clearing {} bad proxy entries", self.controller.retry().len());
                self.controller.retry_mut().clear();
            }
            Command::AddListener { id, listener } => self.status.add_listener(id, listener),
            Command::RemoveListener { id } => {
                self.status.remove_listener(id);
            }
            Command::RetryInfo { reply } => {
                let _ = reply.send(self.controller.retry().entries());
            }
            Command::ConfigChanged(settings) => {
                if let Some(action) = self.controller.on_config_changed(settings) {
                    self.after_reset();
                    self.after_apply();
                    self.perform(action);
                }
            }
            Command::NetworkChanged => {
                if let Some(action) = self.controller.on_network_changed() {
                    info!("Network changed, reloading proxy configuration");
                    self.after_reset();
                    self.perform(action);
                }
            }
            Command::ConfigFetched { epoch, result } => {
                let failed = result.is_err();
                if let Some(action) = self.controller.on_config_fetched(epoch, result) {
                    if failed {
                        self.status.update(ConnectionCode::ConnectionUnavailable, false);
                    } else {
                        self.after_apply();
                    }
                    self.perform(action);
                }
            }
            Command::ResolverReady { epoch, outcome } => {
                let (code, reachable) = match &outcome {
                    InitOutcome::Script { .. } => (ConnectionCode::Ok, true),
                    InitOutcome::Exhausted { error } => (init_failure_code(error), false),
                };
                if let Some(action) = self.controller.on_init_complete(epoch, outcome) {
                    self.status.update(code, reachable);
                    self.perform(action);
                }
            }
            Command::Resolved { id, epoch, result } => self.on_resolved(id, epoch, result),
        }
    }

    fn after_reset(&mut self) {
        self.abort_background();
        self.status.set_reachable(false);
    }

    /// Status once a configuration was applied without needing a script.
    fn after_apply(&mut self) {
        if let Some(mode) = self.controller.mode() {
            let reachable = !mode.is_degraded();
            self.status.update(ConnectionCode::Ok, reachable);
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::FetchConfig { epoch } => {
                let source = self.config_source.clone();
                abort(self.config_task.take());
                self.config_task = Some(self.spawn_reporting(async move {
                    let result = source.current_configuration().await;
                    Command::ConfigFetched { epoch, result }
                }));
            }
            Action::InitResolver { epoch, config } => {
                let initializer = self.initializer.clone();
                abort(self.init_task.take());
                self.init_task = Some(self.spawn_reporting(async move {
                    let outcome = initializer.run(&config.settings).await;
                    Command::ResolverReady { epoch, outcome }
                }));
            }
            Action::Dispatch => self.dispatch(),
        }
    }

    fn submit(&mut self, id: RequestId, url: Url, kind: RequestKind, reply: Reply, span: Span) {
        if let Some(action) = self.controller.on_resolve_request() {
            self.perform(action);
        }

        if self.controller.queue().is_empty() {
            if let Some(mut result) = self.controller.try_complete_synchronously(&url) {
                self.controller.retry().filter(&mut result, Instant::now());
                debug!(parent: &span, "Resolved {} synchronously: {}", url, result);
                let _ = reply.send(Ok(result));
                return;
            }
        }

        debug!(parent: &span, "Queued proxy request for {} ({})", url, self.controller.kind());
        let request = PendingRequest::new(id, url, kind, reply, span);
        self.controller.queue_mut().enqueue(request);
        self.dispatch();
    }

    fn reconsider(&mut self, id: RequestId, url: Url, mut prior: ResolutionResult, reply: Reply, span: Span) {
        if prior.is_direct_only() {
            debug!(parent: &span, "No proxy left to try for {}", url);
            let _ = reply.send(Err(ProxyError::AllProxiesExhausted));
            return;
        }

        let now = Instant::now();
        let failed = prior.first().clone();
        if !failed.is_direct() {
            let delay = self.controller.retry_mut().mark_bad(&failed, now);
            info!(parent: &span, "Proxy {} failed, avoiding it for {:?}", failed, delay);
            self.status.set_code(ConnectionCode::Retry);
        }

        if prior.config_id() != self.controller.config_id() {
            debug!(
                parent: &span,
                "Configuration changed since {}, resolving {} again",
                prior.config_id(),
                url
            );
            self.submit(id, url, RequestKind::Reconsider, reply, span);
            return;
        }

        let outcome = match prior.fallback() {
            Ok(_) => {
                self.controller.retry().filter(&mut prior, now);
                debug!(parent: &span, "Next candidates for {}: {}", url, prior);
                Ok(prior)
            }
            Err(e) => Err(e),
        };
        let _ = reply.send(outcome);
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(request) = self.controller.queue_mut().cancel(id) {
            debug!(parent: &request.span, "Cancelled proxy request {}", id);
            self.dispatch();
        }
    }

    /// Start waiting requests and deliver finished ones in enqueue order.
    fn dispatch(&mut self) {
        let epoch = self.controller.epoch();
        let limit = self.resolver.max_concurrency().max(1);
        let mut in_flight = self.controller.queue().in_flight();
        let now = Instant::now();

        while let Some((id, url, span)) = self
            .controller
            .queue_mut()
            .next_waiting()
            .map(|r| (r.id, r.url.clone(), r.span.clone()))
        {
            let dispatch = match self.controller.try_complete_synchronously(&url) {
                Some(mut result) => {
                    self.controller.retry().filter(&mut result, now);
                    Dispatch::Done(Ok(result))
                }
                None if in_flight >= limit => break,
                None => {
                    in_flight += 1;
                    let task = self.start_resolve(id, url, epoch, span);
                    Dispatch::InFlight { epoch, task }
                }
            };
            if let Some(request) = self.controller.queue_mut().get_mut(id) {
                request.dispatch = dispatch;
            }
        }

        self.controller.queue_mut().deliver_completed();
    }

    fn start_resolve(&self, id: RequestId, url: Url, epoch: u64, span: Span) -> AbortHandle {
        let resolver = self.resolver.clone();
        self.spawn_reporting(
            async move {
                let result = resolver.get_proxy_for_url(&url).await;
                Command::Resolved { id, epoch, result }
            }
            .instrument(span),
        )
    }

    fn on_resolved(&mut self, id: RequestId, epoch: u64, result: Result<Vec<ProxyServer>>) {
        let current = epoch == self.controller.epoch()
            && matches!(
                self.controller.queue().get(id).map(|r| &r.dispatch),
                Some(Dispatch::InFlight { epoch: started, .. }) if *started == epoch
            );
        if !current {
            debug!("Dropping stale resolver answer for request {}", id);
            return;
        }

        let outcome = match result {
            Ok(proxies) => {
                let mut resolved = ResolutionResult::new(proxies, self.controller.config_id());
                self.controller.retry().filter(&mut resolved, Instant::now());
                self.status.set_code(ConnectionCode::Ok);
                Ok(resolved)
            }
            Err(e) => {
                warn!("Proxy resolution for request {} failed: {}", id, e);
                self.status.set_code(ConnectionCode::ServerError);
                match e {
                    ProxyError::ResolveFailed(_) => Err(e),
                    other => Err(ProxyError::ResolveFailed(other.to_string())),
                }
            }
        };

        if let Some(request) = self.controller.queue_mut().get_mut(id) {
            request.dispatch = Dispatch::Done(outcome);
        }
        self.dispatch();
    }

    /// Run `work` off the service task and feed its command back in.
    fn spawn_reporting<F>(&self, work: F) -> AbortHandle
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let command = work.await;
            if let Some(commands) = loopback.upgrade() {
                let _ = commands.send(command);
            }
        })
        .abort_handle()
    }

    fn abort_background(&mut self) {
        abort(self.config_task.take());
        abort(self.init_task.take());
    }

    fn publish(&self) {
        let next = ServiceSnapshot {
            state: self.controller.kind(),
            config: self.controller.config().cloned(),
            status: self.status.status(),
            pending: self.controller.queue().len(),
            bad_proxies: self.controller.retry().len(),
        };
        self.snapshot.send_if_modified(|current| {
            if current.same_as(&next) {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn abort(task: Option<AbortHandle>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigId, ProxyRules};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticSource {
        settings: ProxySettings,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ConfigSourcePort for StaticSource {
        async fn current_configuration(&self) -> Result<ProxySettings> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.settings.clone())
        }

        fn add_observer(&self, _observer: Arc<dyn ConfigObserver>) {}
    }

    struct FailingSource;

    #[async_trait]
    impl ConfigSourcePort for FailingSource {
        async fn current_configuration(&self) -> Result<ProxySettings> {
            Err(ProxyError::ConfigUnavailable("no network".into()))
        }

        fn add_observer(&self, _observer: Arc<dyn ConfigObserver>) {}
    }

    struct NoScripts;

    #[async_trait]
    impl ScriptFetcherPort for NoScripts {
        async fn fetch_script(&self, url: &Url) -> Result<crate::domain::PacScript> {
            Err(ProxyError::fetch_failed(url, "unreachable"))
        }
    }

    struct UnusedResolver;

    #[async_trait]
    impl ProxyResolverPort for UnusedResolver {
        async fn initialize(&self, _script: &crate::domain::PacScript) -> Result<()> {
            Ok(())
        }

        async fn get_proxy_for_url(&self, _target_url: &Url) -> Result<Vec<ProxyServer>> {
            Err(ProxyError::ResolveFailed("no script".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ServiceStatus>>,
    }

    impl StatusListener for Recorder {
        fn on_status_changed(&self, status: ServiceStatus) {
            self.seen.lock().unwrap().push(status);
        }
    }

    fn service(source: Arc<dyn ConfigSourcePort>) -> ProxyService {
        ProxyService::new(
            source,
            Arc::new(UnusedResolver),
            Arc::new(NoScripts),
            ServiceSettings::default(),
        )
    }

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn manual_rules_answer_after_first_fetch() {
        let proxy = ProxyServer::http("proxy.corp", 3128);
        let source = Arc::new(StaticSource {
            settings: ProxySettings::Manual {
                rules: ProxyRules::single(proxy.clone()),
            },
            fetches: AtomicUsize::new(0),
        });
        let service = service(source.clone());

        let first = service.resolve(url("http://example.com/")).await.unwrap();
        assert_eq!(first.proxies(), &[proxy.clone(), ProxyServer::Direct]);
        assert_eq!(first.config_id(), ConfigId::INVALID.next());

        let second = service.resolve(url("https://example.com/")).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(service.state(), StateKind::Ready);
    }

    #[tokio::test]
    async fn unavailable_configuration_degrades_to_direct() {
        let service = service(Arc::new(FailingSource));
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        let result = service.resolve(url("http://example.com/")).await.unwrap();
        assert!(result.is_direct_only());
        assert!(!result.config_id().is_valid());

        let snapshot = service.wait_for(|s| s.state == StateKind::Ready).await.unwrap();
        assert_eq!(
            snapshot.status,
            ServiceStatus {
                code: ConnectionCode::ConnectionUnavailable,
                reachable: false
            }
        );
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_pac_download_reports_io_error() {
        let service = service(Arc::new(StaticSource {
            settings: ProxySettings::PacUrl {
                pac_url: url("http://pac.example/proxy.pac"),
                rules: None,
            },
            fetches: AtomicUsize::new(0),
        }));

        let result = service.resolve(url("http://example.com/")).await.unwrap();
        assert!(result.is_direct_only());
        assert_eq!(service.status().code, ConnectionCode::IoError);
        assert!(!service.status().reachable);
    }

    #[tokio::test]
    async fn try_result_and_explicit_cancel() {
        let service = service(Arc::new(StaticSource {
            settings: ProxySettings::Direct,
            fetches: AtomicUsize::new(0),
        }));

        let mut pending = service.resolve(url("http://example.com/"));
        assert!(pending.try_result().is_none());
        pending.cancel();

        let mut done = service.resolve(url("http://example.com/"));
        service.wait_for(|s| s.state == StateKind::Ready && s.pending == 0).await.unwrap();
        let result = loop {
            if let Some(result) = done.try_result() {
                break result;
            }
            tokio::task::yield_now().await;
        };
        assert!(result.unwrap().is_direct_only());
        assert!(done.try_result().is_none());
    }

    #[tokio::test]
    async fn service_stops_with_its_last_handle() {
        let service = service(Arc::new(StaticSource {
            settings: ProxySettings::Direct,
            fetches: AtomicUsize::new(0),
        }));
        let observer = service.observer();
        let mut snapshot = service.snapshot.clone();
        drop(service);

        assert!(snapshot.changed().await.is_err());
        // forwarding to a stopped service is a no-op
        observer.on_network_changed();
    }
}
