use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::domain::{PacScript, ProxyError, Result};
use crate::ports::ScriptFetcherPort;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_SCRIPT_BYTES: usize = 1024 * 1024;

/// Downloads PAC scripts over HTTP(S), never through a proxy, or reads
/// them from `file://` URLs.
pub struct ReqwestScriptFetcher {
    client: Client,
    max_bytes: usize,
}

impl ReqwestScriptFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, max_bytes })
    }

    async fn fetch_file(&self, url: &Url) -> Result<String> {
        let path = url
            .to_file_path()
            .map_err(|_| ProxyError::fetch_failed(url, "not a local path"))?;

        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| ProxyError::fetch_failed(url, e))?;
        if body.len() > self.max_bytes {
            return Err(ProxyError::fetch_failed(url, self.too_large()));
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch_http(&self, url: &Url) -> Result<String> {
        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ProxyError::fetch_failed(url, e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                return Err(ProxyError::ScriptUnauthorized(url.to_string()))
            }
            status if !status.is_success() => return Err(ProxyError::fetch_failed(url, status)),
            _ => {}
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes as u64) {
            return Err(ProxyError::fetch_failed(url, self.too_large()));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| ProxyError::fetch_failed(url, e))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(ProxyError::fetch_failed(url, self.too_large()));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn too_large(&self) -> String {
        format!("script larger than {} bytes", self.max_bytes)
    }
}

#[async_trait]
impl ScriptFetcherPort for ReqwestScriptFetcher {
    async fn fetch_script(&self, url: &Url) -> Result<PacScript> {
        debug!("Attempting to download PAC file at {}", url);

        let body = match url.scheme() {
            "http" | "https" => self.fetch_http(url).await?,
            "file" => self.fetch_file(url).await?,
            scheme => return Err(ProxyError::fetch_failed(url, format!("unsupported scheme {}", scheme))),
        };

        Ok(PacScript {
            url: url.clone(),
            body,
        })
    }
}
