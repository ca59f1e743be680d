use log::{info, warn};
use resolv_conf::ScopedIp;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::watch::{watch_file, FileWatch};
use crate::domain::{ProxyError, Result};
use crate::ports::NetworkChangeObserver;

/// DNS servers listed in a resolv.conf file
pub fn nameservers(path: &Path) -> Result<Vec<ScopedIp>> {
    let buf = std::fs::read(path).map_err(|e| ProxyError::Config(format!("Cannot open resolv.conf: {}", e)))?;

    let cfg = resolv_conf::Config::parse(&buf)
        .map_err(|e| ProxyError::Config(format!("Cannot parse resolv.conf: {}", e)))?;

    Ok(cfg.get_nameservers_or_local())
}

/// Reports a network change whenever the DNS servers in resolv.conf change.
/// Rewrites that keep the same servers are not reported.
pub struct ResolvConfWatcher {
    path: PathBuf,
    observer: Arc<dyn NetworkChangeObserver>,
}

impl ResolvConfWatcher {
    pub fn new(path: impl Into<PathBuf>, observer: Arc<dyn NetworkChangeObserver>) -> Self {
        Self {
            path: path.into(),
            observer,
        }
    }

    /// Start watching; the watch ends when the returned guard is dropped
    pub fn start(self) -> Result<FileWatch> {
        let path = self.path.clone();
        let observer = self.observer;
        let mut known = nameservers(&path).ok();

        watch_file(&self.path, move || match nameservers(&path) {
            Ok(current) => {
                if known.as_ref() != Some(&current) {
                    info!("DNS servers changed to {:?}", current);
                    known = Some(current);
                    observer.on_network_changed();
                }
            }
            Err(e) => warn!("Failed to parse resolv.conf: {}", e),
        })
    }
}
