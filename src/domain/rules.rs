use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use url::{Host, Url};

use super::{ProxyError, ProxyServer, Result};

/// Manually configured proxies.
///
/// `all` applies to every scheme unless a per-scheme list is set. URLs
/// matching one of the `bypass` rules connect directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ProxyServer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<ProxyServer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub https: Vec<ProxyServer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bypass: Vec<BypassRule>,
}

impl ProxyRules {
    pub fn single(proxy: ProxyServer) -> Self {
        Self {
            all: vec![proxy],
            ..Default::default()
        }
    }

    pub fn with_bypass(mut self, rule: BypassRule) -> Self {
        self.bypass.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.http.is_empty() && self.https.is_empty()
    }

    /// Candidate list for `url`, without the implicit trailing direct entry.
    pub fn select(&self, url: &Url) -> Vec<ProxyServer> {
        if self.bypass.iter().any(|rule| rule.matches(url)) {
            return vec![ProxyServer::Direct];
        }

        let scheme_list = match url.scheme() {
            "http" | "ws" => &self.http,
            "https" | "wss" => &self.https,
            _ => &self.all,
        };

        if scheme_list.is_empty() {
            self.all.clone()
        } else {
            scheme_list.clone()
        }
    }
}

/// A rule for hosts that must not go through a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BypassRule {
    /// `<local>`: host names without a dot.
    PlainHostnames,
    /// Exact host name or IP literal.
    Exact(String),
    /// `*.example.com` or `.example.com`: the domain and its subdomains.
    Domain(String),
    /// IP literals inside a network, e.g. `10.0.0.0/8`.
    Network(IpNet),
}

impl BypassRule {
    pub fn parse(rule: &str) -> Result<Self> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(ProxyError::Config("empty bypass rule".into()));
        }
        if rule.eq_ignore_ascii_case("<local>") {
            return Ok(BypassRule::PlainHostnames);
        }
        if rule.contains('/') {
            return rule
                .parse::<IpNet>()
                .map(BypassRule::Network)
                .map_err(|e| ProxyError::Config(format!("invalid bypass network {}: {}", rule, e)));
        }

        let lowered = rule.to_ascii_lowercase();
        if let Some(domain) = lowered.strip_prefix("*.").or_else(|| lowered.strip_prefix('.')) {
            return Ok(BypassRule::Domain(domain.to_string()));
        }
        Ok(BypassRule::Exact(lowered))
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host() else {
            return false;
        };

        match self {
            BypassRule::PlainHostnames => match host {
                Host::Domain(domain) => !domain.contains('.'),
                _ => false,
            },
            BypassRule::Exact(expected) => match host {
                Host::Domain(domain) => domain.eq_ignore_ascii_case(expected),
                Host::Ipv4(ip) => ip.to_string() == *expected,
                Host::Ipv6(ip) => ip.to_string() == expected.trim_start_matches('[').trim_end_matches(']'),
            },
            BypassRule::Domain(suffix) => match host {
                Host::Domain(domain) => {
                    let domain = domain.to_ascii_lowercase();
                    domain == *suffix || domain.ends_with(&format!(".{}", suffix))
                }
                _ => false,
            },
            BypassRule::Network(net) => match host {
                Host::Ipv4(ip) => net.contains(&IpAddr::V4(ip)),
                Host::Ipv6(ip) => net.contains(&IpAddr::V6(ip)),
                Host::Domain(_) => false,
            },
        }
    }
}

impl TryFrom<String> for BypassRule {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self> {
        BypassRule::parse(&value)
    }
}

impl From<BypassRule> for String {
    fn from(value: BypassRule) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BypassRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BypassRule::PlainHostnames => write!(f, "<local>"),
            BypassRule::Exact(host) => write!(f, "{}", host),
            BypassRule::Domain(suffix) => write!(f, "*.{}", suffix),
            BypassRule::Network(net) => write!(f, "{}", net),
        }
    }
}
