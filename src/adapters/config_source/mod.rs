mod file;
mod fixed;
mod resolvconf;

pub use file::FileConfigSource;
pub use fixed::{FixedConfigSource, NullConfigSource};
pub use resolvconf::{ResolvConfConfigSource, ResolvConfRule};

use crate::domain::ProxySettings;
use crate::ports::ConfigObserver;
use std::sync::{Arc, Mutex};

/// Observers registered with a configuration source
#[derive(Default)]
pub(crate) struct ConfigObservers {
    observers: Mutex<Vec<Arc<dyn ConfigObserver>>>,
}

impl ConfigObservers {
    pub(crate) fn add(&self, observer: Arc<dyn ConfigObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub(crate) fn notify(&self, settings: &ProxySettings) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for observer in observers {
            observer.on_configuration_changed(settings.clone());
        }
    }
}

/// Remembers the last configuration handed out, so that observers only
/// hear about actual changes.
#[derive(Default)]
pub(crate) struct LastSettings(Mutex<Option<ProxySettings>>);

impl LastSettings {
    pub(crate) fn get(&self) -> Option<ProxySettings> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Record `settings`; returns whether they differ from the previous ones.
    pub(crate) fn replace(&self, settings: &ProxySettings) -> bool {
        let mut last = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.as_ref() == Some(settings) {
            return false;
        }
        *last = Some(settings.clone());
        true
    }
}
