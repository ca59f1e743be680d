use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ProxyError, Result};

/// Keeps a file watch alive; dropping it stops the watch.
pub struct FileWatch {
    path: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl FileWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Call `on_change` (from the watcher thread) after `path` was written,
/// created or replaced. The parent directory is watched so that editors
/// replacing the file do not end the watch.
pub fn watch_file<F>(path: &Path, mut on_change: F) -> Result<FileWatch>
where
    F: FnMut() + Send + 'static,
{
    let target = path.to_path_buf();
    let file_name = target.file_name().map(|name| name.to_os_string());
    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut debouncer = new_debouncer(Duration::from_secs(1), move |result: DebounceEventResult| match result {
        Ok(events) => {
            if events.iter().any(|event| event.path.file_name() == file_name.as_deref()) {
                on_change();
            }
        }
        Err(error) => log::info!("File watch error: {:?}", error),
    })
    .map_err(|e| ProxyError::Config(format!("Failed to create debouncer: {}", e)))?;

    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| ProxyError::Config(format!("Failed to watch {}: {}", dir.display(), e)))?;

    log::debug!("Watching {}", target.display());
    Ok(FileWatch {
        path: target,
        _debouncer: debouncer,
    })
}
