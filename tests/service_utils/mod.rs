#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use nanopac::domain::{PacScript, ProxyError, ProxyServer, ProxySettings, Result, RetryPolicy, ServiceSettings, ServiceStatus};
use nanopac::ports::{ConfigObserver, ConfigSourcePort, ProxyResolverPort, ScriptFetcherPort, StatusListener};
use nanopac::{ProxyService, ProxyServiceBuilder};

pub const PAC_URL: &str = "http://pac.test/proxy.pac";

/// Open/closed switch that async mocks wait on
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn open() -> Self {
        Self(Arc::new(watch::channel(true).0))
    }

    pub fn closed() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn hold(&self) {
        self.0.send_replace(false);
    }

    pub fn release(&self) {
        self.0.send_replace(true);
    }

    pub async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let opened = rx.wait_for(|open| *open).await.is_ok();
        if !opened {
            std::future::pending::<()>().await;
        }
    }
}

/// Configuration source whose answers can be held back and changed
pub struct TestConfigSource {
    settings: Mutex<Result<ProxySettings>>,
    observers: Mutex<Vec<Arc<dyn ConfigObserver>>>,
    pub gate: Gate,
    pub fetches: AtomicUsize,
}

impl TestConfigSource {
    pub fn new(settings: ProxySettings) -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(Ok(settings)),
            observers: Mutex::new(Vec::new()),
            gate: Gate::open(),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn held(settings: ProxySettings) -> Arc<Self> {
        let source = Self::new(settings);
        source.gate.hold();
        source
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Change what the next fetch answers without notifying anyone
    pub fn answer(&self, settings: Result<ProxySettings>) {
        *self.settings.lock().unwrap() = settings;
    }

    /// Change the settings and notify observers, whether or not they changed
    pub fn notify(&self, settings: ProxySettings) {
        *self.settings.lock().unwrap() = Ok(settings.clone());
        for observer in self.observers.lock().unwrap().iter() {
            observer.on_configuration_changed(settings.clone());
        }
    }
}

#[async_trait]
impl ConfigSourcePort for TestConfigSource {
    async fn current_configuration(&self) -> Result<ProxySettings> {
        self.gate.pass().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.settings.lock().unwrap().clone()
    }

    fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.observers.lock().unwrap().push(observer);
    }
}

/// PAC engine answering from a host table. Initialization and single hosts
/// can be held back.
pub struct TestResolver {
    answers: HashMap<String, Vec<ProxyServer>>,
    host_gates: Mutex<HashMap<String, Gate>>,
    concurrency: usize,
    pub init_gate: Gate,
    pub scripts: Mutex<Vec<PacScript>>,
    pub calls: Mutex<Vec<String>>,
    pub purges: AtomicUsize,
}

impl TestResolver {
    pub fn new(answers: &[(&str, Vec<ProxyServer>)], concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            answers: answers.iter().map(|(host, p)| (host.to_string(), p.clone())).collect(),
            host_gates: Mutex::new(HashMap::new()),
            concurrency,
            init_gate: Gate::open(),
            scripts: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            purges: AtomicUsize::new(0),
        })
    }

    pub fn hold_host(&self, host: &str) -> Gate {
        let gate = Gate::closed();
        self.host_gates.lock().unwrap().insert(host.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyResolverPort for TestResolver {
    async fn initialize(&self, script: &PacScript) -> Result<()> {
        self.init_gate.pass().await;
        if script.body.contains("syntax error") {
            return Err(ProxyError::ResolverInitFailed("script does not compile".into()));
        }
        self.scripts.lock().unwrap().push(script.clone());
        Ok(())
    }

    async fn get_proxy_for_url(&self, target_url: &Url) -> Result<Vec<ProxyServer>> {
        let host = target_url.host_str().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(host.clone());

        let gate = self.host_gates.lock().unwrap().get(&host).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        match self.answers.get(&host) {
            Some(proxies) => Ok(proxies.clone()),
            None if host == "broken.test" => Err(ProxyError::ResolveFailed("FindProxyForURL threw".into())),
            None => Ok(Vec::new()),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn purge_memory(&self) {
        self.purges.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves scripts from a URL table
pub struct TestFetcher {
    scripts: HashMap<Url, Result<String>>,
    pub fetched: Mutex<Vec<Url>>,
}

impl TestFetcher {
    pub fn new(scripts: Vec<(&str, Result<String>)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .into_iter()
                .map(|(url, body)| (url.parse().unwrap(), body))
                .collect(),
            fetched: Mutex::new(Vec::new()),
        })
    }

    pub fn serving_pac() -> Arc<Self> {
        Self::new(vec![(PAC_URL, Ok("function FindProxyForURL(url, host) { return \"DIRECT\"; }".into()))])
    }

    pub fn fetched(&self) -> Vec<Url> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptFetcherPort for TestFetcher {
    async fn fetch_script(&self, url: &Url) -> Result<PacScript> {
        self.fetched.lock().unwrap().push(url.clone());
        match self.scripts.get(url) {
            Some(Ok(body)) => Ok(PacScript {
                url: url.clone(),
                body: body.clone(),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ProxyError::fetch_failed(url, "404 Not Found")),
        }
    }
}

#[derive(Default)]
pub struct StatusRecorder {
    seen: Mutex<Vec<ServiceStatus>>,
}

impl StatusRecorder {
    pub fn seen(&self) -> Vec<ServiceStatus> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl StatusListener for StatusRecorder {
    fn on_status_changed(&self, status: ServiceStatus) {
        self.seen.lock().unwrap().push(status);
    }
}

pub fn test_settings() -> ServiceSettings {
    ServiceSettings {
        wpad_url: "http://wpad.test/wpad.dat".parse().unwrap(),
        retry: RetryPolicy {
            base_delay_secs: 10,
            max_delay_secs: 60,
        },
    }
}

pub fn start(
    source: Arc<TestConfigSource>,
    resolver: Arc<TestResolver>,
    fetcher: Arc<TestFetcher>,
) -> (ProxyService, Arc<StatusRecorder>) {
    let recorder = Arc::new(StatusRecorder::default());
    let service = ProxyServiceBuilder::new()
        .config_source(source)
        .resolver(resolver)
        .script_fetcher(fetcher)
        .listener(recorder.clone())
        .settings(test_settings())
        .build()
        .unwrap();
    (service, recorder)
}

pub fn pac_settings() -> ProxySettings {
    ProxySettings::PacUrl {
        pac_url: PAC_URL.parse().unwrap(),
        rules: None,
    }
}

pub fn url(s: &str) -> Url {
    s.parse().unwrap()
}

/// Let the service and its background tasks run until nothing is left to do
pub async fn settle(service: &ProxyService) {
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let _ = service.retry_info().await;
    }
}
