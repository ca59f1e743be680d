use super::pac_evaluator::{compile_pac, evaluate_pac, pac_visible_url};
use crate::domain::{PacScript, ProxyError, ProxyServer, Result};
use crate::ports::ProxyResolverPort;
use async_trait::async_trait;
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use tracing::info;
use url::Url;

const DEFAULT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

/// Runs PAC scripts on the blocking pool, at most `threads` at a time
pub struct PacProxyResolver {
    script: RwLock<Option<Arc<PacScript>>>,
    answers: RwLock<LruCache<String, (Instant, Vec<ProxyServer>)>>,
    answer_ttl: Duration,
    workers: Arc<Semaphore>,
    threads: usize,
}

impl PacProxyResolver {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            script: RwLock::new(None),
            answers: RwLock::new(LruCache::new(DEFAULT_CACHE_SIZE)),
            answer_ttl: Duration::from_secs(30),
            workers: Arc::new(Semaphore::new(threads)),
            threads,
        }
    }

    pub fn with_answer_ttl(mut self, ttl: Duration) -> Self {
        self.answer_ttl = ttl;
        self
    }

    pub async fn cached_answers(&self) -> usize {
        self.answers.read().await.len()
    }

    async fn cached(&self, key: &str) -> Option<Vec<ProxyServer>> {
        let mut answers = self.answers.write().await;
        match answers.get(key) {
            Some((at, proxies)) if at.elapsed() < self.answer_ttl => Some(proxies.clone()),
            Some(_) => {
                answers.pop(key);
                None
            }
            None => None,
        }
    }

    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ProxyError::ResolveFailed(format!("PAC workers closed: {}", e)))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| ProxyError::ResolveFailed(format!("PAC worker failed: {}", e)))?
    }
}

#[async_trait]
impl ProxyResolverPort for PacProxyResolver {
    async fn initialize(&self, script: &PacScript) -> Result<()> {
        let body = script.body.clone();
        self.run(move || compile_pac(&body)).await?;

        *self.script.write().await = Some(Arc::new(script.clone()));
        self.answers.write().await.clear();

        info!("Loaded PAC file from {} ({} bytes)", script.url, script.body.len());
        Ok(())
    }

    async fn get_proxy_for_url(&self, target_url: &Url) -> Result<Vec<ProxyServer>> {
        let script = self
            .script
            .read()
            .await
            .clone()
            .ok_or_else(|| ProxyError::ResolveFailed("no PAC script loaded".into()))?;

        let key = pac_visible_url(target_url);
        if let Some(proxies) = self.cached(&key).await {
            debug!("PAC answer for {} served from cache", key);
            return Ok(proxies);
        }

        let target = target_url.clone();
        let proxies = self.run(move || evaluate_pac(&script.body, &target)).await?;
        debug!("PAC answer for {}: {:?}", key, proxies);

        self.answers.write().await.put(key, (Instant::now(), proxies.clone()));
        Ok(proxies)
    }

    fn max_concurrency(&self) -> usize {
        self.threads
    }

    async fn purge_memory(&self) {
        let mut answers = self.answers.write().await;
        debug!("Dropping {} cached PAC answers", answers.len());
        answers.clear();
    }
}

impl Default for PacProxyResolver {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> PacScript {
        PacScript {
            url: "http://pac.example/proxy.pac".parse().unwrap(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolves_after_initialize() {
        let resolver = PacProxyResolver::new(2);
        let url: Url = "http://www.example.com/".parse().unwrap();

        assert!(matches!(
            resolver.get_proxy_for_url(&url).await,
            Err(ProxyError::ResolveFailed(_))
        ));

        resolver
            .initialize(&script(
                r#"function FindProxyForURL(url, host) { return "PROXY corp:3128; DIRECT"; }"#,
            ))
            .await
            .unwrap();

        let proxies = resolver.get_proxy_for_url(&url).await.unwrap();
        assert_eq!(proxies, vec![ProxyServer::http("corp", 3128), ProxyServer::Direct]);
        assert_eq!(resolver.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_dropped_on_purge_and_reload() {
        let resolver = PacProxyResolver::default();
        resolver
            .initialize(&script(r#"function FindProxyForURL(url, host) { return "PROXY a:1"; }"#))
            .await
            .unwrap();

        let url: Url = "http://www.example.com/".parse().unwrap();
        resolver.get_proxy_for_url(&url).await.unwrap();
        resolver.get_proxy_for_url(&url).await.unwrap();
        assert_eq!(resolver.cached_answers().await, 1);

        resolver.purge_memory().await;
        assert_eq!(resolver.cached_answers().await, 0);

        resolver.get_proxy_for_url(&url).await.unwrap();
        resolver
            .initialize(&script(r#"function FindProxyForURL(url, host) { return "PROXY b:2"; }"#))
            .await
            .unwrap();
        assert_eq!(resolver.cached_answers().await, 0);
        assert_eq!(
            resolver.get_proxy_for_url(&url).await.unwrap(),
            vec![ProxyServer::http("b", 2)]
        );
    }

    #[tokio::test]
    async fn test_broken_script_keeps_previous_one() {
        let resolver = PacProxyResolver::default();
        resolver
            .initialize(&script(r#"function FindProxyForURL(url, host) { return "PROXY a:1"; }"#))
            .await
            .unwrap();

        assert!(resolver.initialize(&script("function (")).await.is_err());

        let url: Url = "http://www.example.com/".parse().unwrap();
        assert_eq!(
            resolver.get_proxy_for_url(&url).await.unwrap(),
            vec![ProxyServer::http("a", 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_expire() {
        let resolver = PacProxyResolver::default().with_answer_ttl(Duration::from_secs(5));
        resolver
            .answers
            .write()
            .await
            .put("http://a/".to_string(), (Instant::now(), vec![ProxyServer::Direct]));

        assert_eq!(resolver.cached("http://a/").await, Some(vec![ProxyServer::Direct]));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(resolver.cached("http://a/").await, None);
        assert_eq!(resolver.cached_answers().await, 0);
    }
}
