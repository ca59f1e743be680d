use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::ports::StatusListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionCode {
    #[default]
    None,
    ConnectionUnavailable,
    IoError,
    ServerError,
    AuthError,
    Ok,
    Retry,
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionCode::None => "NONE",
            ConnectionCode::ConnectionUnavailable => "CONNECTION_UNAVAILABLE",
            ConnectionCode::IoError => "IO_ERROR",
            ConnectionCode::ServerError => "SERVER_ERROR",
            ConnectionCode::AuthError => "AUTH_ERROR",
            ConnectionCode::Ok => "OK",
            ConnectionCode::Retry => "RETRY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub code: ConnectionCode,
    pub reachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Current status plus the listeners interested in it.
///
/// A change of the connection code and a change of reachability each
/// produce one notification; updates that change nothing are silent.
#[derive(Default)]
pub struct StatusBoard {
    status: ServiceStatus,
    listeners: Vec<(ListenerId, Arc<dyn StatusListener>)>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn add_listener(&mut self, id: ListenerId, listener: Arc<dyn StatusListener>) {
        self.listeners.push((id, listener));
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        before != self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_code(&mut self, code: ConnectionCode) {
        self.update(code, self.status.reachable);
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.update(self.status.code, reachable);
    }

    pub fn update(&mut self, code: ConnectionCode, reachable: bool) {
        let code_changed = self.status.code != code;
        let reachability_changed = self.status.reachable != reachable;

        if code_changed {
            self.status.code = code;
            self.notify();
        }
        if reachability_changed {
            self.status.reachable = reachable;
            self.notify();
        }
    }

    fn notify(&self) {
        tracing::debug!(
            "Proxy service status: {} (reachable: {})",
            self.status.code,
            self.status.reachable
        );
        for (_, listener) in &self.listeners {
            listener.on_status_changed(self.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ServiceStatus>>,
    }

    impl StatusListener for Recorder {
        fn on_status_changed(&self, status: ServiceStatus) {
            self.seen.lock().unwrap().push(status);
        }
    }

    #[test]
    fn each_kind_of_change_notifies_once() {
        let recorder = Arc::new(Recorder::default());
        let mut board = StatusBoard::new();
        board.add_listener(ListenerId::new(), recorder.clone());

        board.update(ConnectionCode::Ok, true);
        board.update(ConnectionCode::Ok, true);
        board.set_reachable(true);
        board.set_code(ConnectionCode::Retry);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ServiceStatus {
                    code: ConnectionCode::Ok,
                    reachable: false
                },
                ServiceStatus {
                    code: ConnectionCode::Ok,
                    reachable: true
                },
                ServiceStatus {
                    code: ConnectionCode::Retry,
                    reachable: true
                },
            ]
        );
    }

    #[test]
    fn removed_listeners_are_not_called() {
        let recorder = Arc::new(Recorder::default());
        let mut board = StatusBoard::new();
        let id = ListenerId::new();
        board.add_listener(id, recorder.clone());

        assert!(board.remove_listener(id));
        assert!(!board.remove_listener(id));
        board.set_code(ConnectionCode::IoError);

        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(board.listener_count(), 0);
    }
}
