use crate::domain::{ProxyError, ProxySettings, Result};
use crate::ports::{ConfigObserver, ConfigSourcePort};
use async_trait::async_trait;
use ipnet::Ipv4Net;
use log::{info, warn};
use resolv_conf::ScopedIp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvConfRule {
    pub resolver_subnet: String,
    pub pac_url: Url,
}

struct Selector {
    path: PathBuf,
    rules: Vec<(Ipv4Net, Url)>,
}

impl Selector {
    /// PAC URL of the first rule whose subnet contains a configured DNS server
    fn select(&self) -> Result<Option<Url>> {
        let buf = std::fs::read(&self.path)
            .map_err(|e| ProxyError::ConfigUnavailable(format!("Cannot read {}: {}", self.path.display(), e)))?;

        let cfg = resolv_conf::Config::parse(&buf)
            .map_err(|e| ProxyError::ConfigUnavailable(format!("Cannot parse {}: {}", self.path.display(), e)))?;

        for ip in cfg.get_nameservers_or_local() {
            if let ScopedIp::V4(ip) = ip {
                if let Some((net, url)) = self.rules.iter().find(|(net, _)| net.contains(&ip)) {
                    info!("DNS server {} is in {}, using PAC file {}", ip, net, url);
                    return Ok(Some(url.clone()));
                }
            }
        }
        Ok(None)
    }

    fn apply(&self, settings: ProxySettings) -> ProxySettings {
        match self.select() {
            Ok(Some(pac_url)) => ProxySettings::PacUrl { pac_url, rules: None },
            Ok(None) => settings,
            Err(e) => {
                warn!("Ignoring resolv.conf rules: {}", e);
                settings
            }
        }
    }
}

/// Picks a PAC URL from the DNS servers in resolv.conf, and defers to
/// `fallback` when no rule matches.
pub struct ResolvConfConfigSource {
    selector: Arc<Selector>,
    fallback: Arc<dyn ConfigSourcePort>,
}

impl ResolvConfConfigSource {
    pub fn new(path: impl AsRef<Path>, rules: &[ResolvConfRule], fallback: Arc<dyn ConfigSourcePort>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                rule.resolver_subnet
                    .parse::<Ipv4Net>()
                    .map(|net| (net, rule.pac_url.clone()))
                    .map_err(|e| ProxyError::Config(format!("Invalid subnet {}: {}", rule.resolver_subnet, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            selector: Arc::new(Selector {
                path: path.as_ref().to_path_buf(),
                rules,
            }),
            fallback,
        })
    }
}

/// Re-applies the rules to changes coming from the fallback source
struct RuleAwareObserver {
    selector: Arc<Selector>,
    inner: Arc<dyn ConfigObserver>,
}

impl ConfigObserver for RuleAwareObserver {
    fn on_configuration_changed(&self, settings: ProxySettings) {
        self.inner.on_configuration_changed(self.selector.apply(settings));
    }
}

#[async_trait]
impl ConfigSourcePort for ResolvConfConfigSource {
    async fn current_configuration(&self) -> Result<ProxySettings> {
        let selector = self.selector.clone();
        let selected = tokio::task::spawn_blocking(move || selector.select())
            .await
            .map_err(|e| ProxyError::ConfigUnavailable(e.to_string()))?;

        match selected {
            Ok(Some(pac_url)) => Ok(ProxySettings::PacUrl { pac_url, rules: None }),
            Ok(None) => self.fallback.current_configuration().await,
            Err(e) => {
                warn!("Ignoring resolv.conf rules: {}", e);
                self.fallback.current_configuration().await
            }
        }
    }

    fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.fallback.add_observer(Arc::new(RuleAwareObserver {
            selector: self.selector.clone(),
            inner: observer,
        }));
    }
}
