use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::adapters::ResolvConfRule;
use crate::domain::{ProxyError, ProxySettings, Result, RetryPolicy, ServiceSettings};

pub const APP_NAME: &str = "nanopac";

/// Contents of `nanopac.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NanopacConfig {
    /// How proxies are chosen
    pub proxy: ProxySettings,
    /// Backoff for proxies that failed
    pub retry: RetryPolicy,
    pub service: ServiceConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Script location probed when auto-detecting
    pub wpad_url: Url,
    pub fetch_timeout_secs: u64,
    pub max_script_bytes: usize,
    /// PAC evaluations allowed to run at the same time
    pub resolver_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            wpad_url: ServiceSettings::default().wpad_url,
            fetch_timeout_secs: 30,
            max_script_bytes: 1024 * 1024,
            resolver_threads: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Reload the proxy configuration when the DNS servers change
    pub watch_resolv_conf: bool,
    pub resolv_conf_path: PathBuf,
    /// Use a PAC URL while a DNS server is inside a given subnet
    pub resolv_conf_rules: Vec<ResolvConfRule>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            watch_resolv_conf: true,
            resolv_conf_path: PathBuf::from("/etc/resolv.conf"),
            resolv_conf_rules: Vec::new(),
        }
    }
}

impl NanopacConfig {
    /// Load from `path`, or from the default per-user location. A missing
    /// file is created with default contents.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let loaded = match path {
            Some(path) => confy::load_path(path),
            None => confy::load(APP_NAME, None),
        };
        loaded.map_err(|e| ProxyError::Config(e.to_string()))
    }

    pub fn default_path() -> Result<PathBuf> {
        confy::get_configuration_file_path(APP_NAME, None).map_err(|e| ProxyError::Config(e.to_string()))
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            wpad_url: self.service.wpad_url.clone(),
            retry: self.retry.clone(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.service.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BypassRule, ProxyServer};
    use std::io::Write;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[proxy]
mode = "manual"

[proxy.rules]
all = ["proxy.corp:3128"]
https = ["socks5://socks.corp:1080"]
bypass = ["<local>", "*.internal.corp", "10.0.0.0/8"]

[retry]
base_delay_secs = 60

[service]
resolver_threads = 4

[[network.resolv_conf_rules]]
resolver_subnet = "10.1.0.0/16"
pac_url = "http://pac.corp/proxy.pac"
"#
        )
        .unwrap();

        let config = NanopacConfig::load(Some(file.path())).unwrap();
        let ProxySettings::Manual { rules } = &config.proxy else {
            panic!("expected manual settings, got {:?}", config.proxy);
        };
        assert_eq!(rules.all, vec![ProxyServer::http("proxy.corp", 3128)]);
        assert_eq!(rules.https[0].to_string(), "socks5://socks.corp:1080");
        assert_eq!(rules.bypass[0], BypassRule::PlainHostnames);

        assert_eq!(config.retry.base_delay_secs, 60);
        assert_eq!(config.retry.max_delay_secs, 30 * 60);
        assert_eq!(config.service.resolver_threads, 4);
        assert_eq!(config.service.fetch_timeout_secs, 30);
        assert_eq!(config.network.resolv_conf_rules[0].resolver_subnet, "10.1.0.0/16");
        assert!(config.network.watch_resolv_conf);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanopac.toml");

        let config = NanopacConfig::load(Some(&path)).unwrap();
        assert_eq!(config, NanopacConfig::default());
        assert!(path.exists());
        assert_eq!(NanopacConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[proxy]\nmode = \"carrier-pigeon\"\n").unwrap();

        assert!(matches!(
            NanopacConfig::load(Some(file.path())),
            Err(ProxyError::Config(_))
        ));
    }
}
