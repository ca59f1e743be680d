use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::rules::ProxyRules;
use super::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProxyScheme::Http => 80,
            ProxyScheme::Https => 443,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => 1080,
        }
    }

    fn from_uri_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks4" => Some(ProxyScheme::Socks4),
            "socks" | "socks5" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }

    fn pac_keyword(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "PROXY",
            ProxyScheme::Https => "HTTPS",
            ProxyScheme::Socks4 => "SOCKS",
            ProxyScheme::Socks5 => "SOCKS5",
        }
    }
}

/// One candidate in a proxy list: either a direct connection or an upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProxyServer {
    Direct,
    Upstream {
        scheme: ProxyScheme,
        host: String,
        port: u16,
    },
}

impl ProxyServer {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        ProxyServer::Upstream {
            scheme: ProxyScheme::Http,
            host: host.into(),
            port,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ProxyServer::Direct)
    }


    /// Parse a single entry of a `FindProxyForURL` result, e.g. `PROXY proxy.corp:3128`.
    pub fn from_pac_token(token: &str) -> Result<Self> {
        let mut parts = token.split_whitespace();
        let keyword = parts
            .next()
            .ok_or_else(|| ProxyError::InvalidProxy("empty PAC entry".into()))?
            .to_ascii_uppercase();

        let scheme = match keyword.as_str() {
            "DIRECT" => return Ok(ProxyServer::Direct),
            "PROXY" | "HTTP" => ProxyScheme::Http,
            "HTTPS" => ProxyScheme::Https,
            "SOCKS" | "SOCKS4" => ProxyScheme::Socks4,
            "SOCKS5" => ProxyScheme::Socks5,
            other => return Err(ProxyError::InvalidProxy(format!("unknown PAC keyword {}", other))),
        };

        let authority = parts
            .next()
            .ok_or_else(|| ProxyError::InvalidProxy(format!("missing host after {}", keyword)))?;
        Self::from_authority(scheme, authority)
    }

    fn from_authority(scheme: ProxyScheme, authority: &str) -> Result<Self> {
        let url = Url::parse(&format!("{}://{}", scheme.as_str(), authority))
            .map_err(|e| ProxyError::InvalidProxy(format!("{}: {}", authority, e)))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::InvalidProxy(format!("missing host in {}", authority)))?;

        Ok(ProxyServer::Upstream {
            scheme,
            host: host.to_ascii_lowercase(),
            port: url.port().unwrap_or_else(|| scheme.default_port()),
        })
    }

    pub fn to_pac_string(&self) -> String {
        match self {
            ProxyServer::Direct => "DIRECT".to_string(),
            ProxyServer::Upstream { scheme, host, port } => {
                format!("{} {}:{}", scheme.pac_keyword(), host, port)
            }
        }
    }
}

impl FromStr for ProxyServer {
    type Err = ProxyError;

    /// Accepts URI form (`socks5://host:1080`, `direct://`) or a bare
    /// `host:port`, which means an HTTP proxy.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("direct") || s.eq_ignore_ascii_case("direct://") {
            return Ok(ProxyServer::Direct);
        }

        match s.split_once("://") {
            Some((scheme, authority)) => {
                let scheme = ProxyScheme::from_uri_scheme(scheme)
                    .ok_or_else(|| ProxyError::InvalidProxy(format!("unsupported scheme in {}", s)))?;
                Self::from_authority(scheme, authority.trim_end_matches('/'))
            }
            None => Self::from_authority(ProxyScheme::Http, s),
        }
    }
}

impl TryFrom<String> for ProxyServer {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProxyServer> for String {
    fn from(value: ProxyServer) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyServer::Direct => write!(f, "direct://"),
            ProxyServer::Upstream { scheme, host, port } => write!(f, "{}://{}:{}", scheme.as_str(), host, port),
        }
    }
}

/// Parse a whole `FindProxyForURL` return value. Entries that cannot be
/// parsed are skipped.
pub fn parse_pac_result(result: &str) -> Vec<ProxyServer> {
    result
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter_map(|token| match ProxyServer::from_pac_token(token) {
            Ok(server) => Some(server),
            Err(e) => {
                tracing::warn!("Ignoring PAC entry {:?}: {}", token, e);
                None
            }
        })
        .collect()
}

/// Identifier of an applied configuration. Increases every time the service
/// applies a new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConfigId(u64);

impl ConfigId {
    pub const INVALID: ConfigId = ConfigId(0);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn next(&self) -> ConfigId {
        ConfigId(self.0 + 1)
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// How proxy information is to be obtained. The mode is always explicit:
/// a direct configuration is `Direct`, never an empty rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProxySettings {
    Direct,
    AutoDetect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pac_url: Option<Url>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rules: Option<ProxyRules>,
    },
    PacUrl {
        pac_url: Url,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rules: Option<ProxyRules>,
    },
    Manual {
        rules: ProxyRules,
    },
}

impl Default for ProxySettings {
    fn default() -> Self {
        ProxySettings::Direct
    }
}

impl ProxySettings {
    /// Rules to use once every script source failed.
    pub fn fallback_rules(&self) -> Option<&ProxyRules> {
        match self {
            ProxySettings::Direct => None,
            ProxySettings::AutoDetect { rules, .. } | ProxySettings::PacUrl { rules, .. } => rules.as_ref(),
            ProxySettings::Manual { rules } => Some(rules),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProxySettings::Direct => "direct",
            ProxySettings::AutoDetect { .. } => "auto-detect",
            ProxySettings::PacUrl { .. } => "pac-url",
            ProxySettings::Manual { .. } => "manual",
        }
    }
}

/// An applied configuration snapshot.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub id: ConfigId,
    pub settings: ProxySettings,
}

impl ProxyConfig {
    pub fn new(id: ConfigId, settings: ProxySettings) -> Self {
        Self { id, settings }
    }

    /// Content comparison, ignoring the identifier.
    pub fn same_content(&self, settings: &ProxySettings) -> bool {
        &self.settings == settings
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacScript {
    pub url: Url,
    pub body: String,
}

/// Ordered proxy candidates for one URL. The list is never empty and always
/// ends with [`ProxyServer::Direct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    proxies: Vec<ProxyServer>,
    config_id: ConfigId,
}

impl ResolutionResult {
    pub fn direct() -> Self {
        Self::new(Vec::new(), ConfigId::INVALID)
    }

    pub fn new(mut proxies: Vec<ProxyServer>, config_id: ConfigId) -> Self {
        if proxies.last() != Some(&ProxyServer::Direct) {
            proxies.push(ProxyServer::Direct);
        }
        Self { proxies, config_id }
    }

    pub fn proxies(&self) -> &[ProxyServer] {
        &self.proxies
    }

    pub fn first(&self) -> &ProxyServer {
        &self.proxies[0]
    }

    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    pub fn is_direct_only(&self) -> bool {
        self.proxies.len() == 1
    }

    /// Move candidates for which `is_bad` holds behind the good ones. The
    /// trailing direct entry stays last.
    pub fn deprioritize<F>(&mut self, is_bad: F)
    where
        F: Fn(&ProxyServer) -> bool,
    {
        let sentinel = self.proxies.pop();
        let (good, bad): (Vec<_>, Vec<_>) = self
            .proxies
            .drain(..)
            .partition(|p| p.is_direct() || !is_bad(p));
        self.proxies = good;
        self.proxies.extend(bad);
        self.proxies.extend(sentinel);
    }

    /// Drop the head candidate after it failed and return it.
    pub fn fallback(&mut self) -> Result<ProxyServer> {
        if self.is_direct_only() {
            return Err(ProxyError::AllProxiesExhausted);
        }
        Ok(self.proxies.remove(0))
    }
}

impl fmt::Display for ResolutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.proxies.iter().map(|p| p.to_pac_string()).collect();
        write!(f, "{}", entries.join("; "))
    }
}
