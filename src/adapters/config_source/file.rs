use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ConfigObservers, LastSettings};
use crate::adapters::watch::{watch_file, FileWatch};
use crate::config::NanopacConfig;
use crate::domain::{ProxyError, ProxySettings, Result};
use crate::ports::{ConfigObserver, ConfigSourcePort};

/// Reads the `[proxy]` section of the configuration file
pub struct FileConfigSource {
    path: PathBuf,
    last: LastSettings,
    observers: ConfigObservers,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: LastSettings::default(),
            observers: ConfigObservers::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ProxySettings> {
        NanopacConfig::load(Some(&self.path))
            .map(|config| config.proxy)
            .map_err(|e| ProxyError::ConfigUnavailable(e.to_string()))
    }

    /// Read the file again and tell observers if the proxy settings changed
    pub fn reload(&self) {
        match self.load() {
            Ok(settings) => {
                if self.last.replace(&settings) {
                    info!("Proxy configuration in {} changed", self.path.display());
                    self.observers.notify(&settings);
                }
            }
            Err(e) => warn!("Keeping current proxy configuration: {}", e),
        }
    }

    /// Reload whenever the file changes on disk
    pub fn watch(self: &Arc<Self>) -> Result<FileWatch> {
        let source = Arc::downgrade(self);
        watch_file(&self.path, move || {
            if let Some(source) = source.upgrade() {
                source.reload();
            }
        })
    }
}

#[async_trait]
impl ConfigSourcePort for FileConfigSource {
    async fn current_configuration(&self) -> Result<ProxySettings> {
        let settings = self.load()?;
        self.last.replace(&settings);
        Ok(settings)
    }

    fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.observers.add(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(Mutex<mpsc::UnboundedSender<ProxySettings>>);

    impl ConfigObserver for Forward {
        fn on_configuration_changed(&self, settings: ProxySettings) {
            let _ = self.0.lock().unwrap().send(settings);
        }
    }

    const MANUAL: &str = "[proxy]\nmode = \"manual\"\n\n[proxy.rules]\nall = [\"proxy:3128\"]\n";
    const PAC: &str = "[proxy]\nmode = \"pac_url\"\npac_url = \"http://pac.example/proxy.pac\"\n";

    #[tokio::test]
    async fn test_reload_reports_changes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanopac.toml");
        std::fs::write(&path, MANUAL).unwrap();

        let source = FileConfigSource::new(&path);
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.add_observer(Arc::new(Forward(Mutex::new(tx))));

        assert_eq!(source.current_configuration().await.unwrap().name(), "manual");

        source.reload();
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, PAC).unwrap();
        source.reload();
        source.reload();
        assert_eq!(rx.try_recv().unwrap().name(), "pac-url");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanopac.toml");
        std::fs::write(&path, MANUAL).unwrap();

        let source = Arc::new(FileConfigSource::new(&path));
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.add_observer(Arc::new(Forward(Mutex::new(tx))));
        source.current_configuration().await.unwrap();
        let _watch = source.watch().unwrap();

        std::fs::write(&path, PAC).unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no change notification")
            .unwrap();
        assert_eq!(changed.name(), "pac-url");
    }

    #[tokio::test]
    async fn test_broken_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanopac.toml");
        std::fs::write(&path, "[proxy\n").unwrap();

        let source = FileConfigSource::new(&path);
        assert!(matches!(
            source.current_configuration().await,
            Err(ProxyError::ConfigUnavailable(_))
        ));
    }
}
