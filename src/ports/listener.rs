use crate::domain::ServiceStatus;

/// Receives proxy service status changes. Called from the service context,
/// so implementations must not block.
pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, status: ServiceStatus);
}

/// Receives notifications that the network environment changed.
pub trait NetworkChangeObserver: Send + Sync {
    fn on_network_changed(&self);
}
