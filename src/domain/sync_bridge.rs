use tokio::runtime::Handle;
use tokio::sync::oneshot;
use url::Url;

use super::context::in_service_context;
use super::{PendingResolution, ProxyError, ProxyService, ResolutionResult, Result};

/// Blocking front end for callers outside of async code.
///
/// Must not be used from async code: the service's own task (status
/// listeners run there) or any other thread currently driving a tokio
/// runtime. Such calls fail with [`ProxyError::BlockingInServiceContext`].
#[derive(Clone)]
pub struct SyncProxyService {
    runtime: Handle,
    service: ProxyService,
}

impl SyncProxyService {
    pub fn new(runtime: Handle, service: ProxyService) -> Self {
        Self { runtime, service }
    }

    pub fn service(&self) -> &ProxyService {
        &self.service
    }

    pub fn resolve(&self, url: Url) -> Result<ResolutionResult> {
        self.wait(move |service| service.resolve(url))
    }

    pub fn reconsider_after_error(&self, url: Url, prior: ResolutionResult) -> Result<ResolutionResult> {
        self.wait(move |service| service.reconsider_after_error(url, prior))
    }

    fn wait<F>(&self, start: F) -> Result<ResolutionResult>
    where
        F: FnOnce(&ProxyService) -> PendingResolution + Send + 'static,
    {
        // a runtime thread blocked here may be the one that has to run the request
        if in_service_context() || Handle::try_current().is_ok() {
            return Err(ProxyError::BlockingInServiceContext);
        }

        let (tx, rx) = oneshot::channel();
        let service = self.service.clone();
        self.runtime.spawn(async move {
            let result = start(&service).await;
            let _ = tx.send(result);
        });

        // the sender is dropped without a value if the runtime shuts down
        rx.blocking_recv().unwrap_or(Err(ProxyError::ServiceStopped))
    }
}
