use tracing::{info, warn};

use crate::domain::{ConnectionCode, ServiceStatus};
use crate::ports::StatusListener;

/// Writes every status change to the log
#[derive(Debug, Default)]
pub struct LoggingStatusListener;

impl StatusListener for LoggingStatusListener {
    fn on_status_changed(&self, status: ServiceStatus) {
        match status.code {
            ConnectionCode::None | ConnectionCode::Ok | ConnectionCode::Retry => {
                info!("Proxy service status {} (reachable: {})", status.code, status.reachable)
            }
            _ => warn!("Proxy service status {} (reachable: {})", status.code, status.reachable),
        }
    }
}
