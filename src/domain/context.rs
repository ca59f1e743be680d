use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static IN_SERVICE_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is running the proxy service task right now.
/// Listener callbacks fired by the service observe `true`.
pub fn in_service_context() -> bool {
    IN_SERVICE_CONTEXT.with(|flag| flag.get())
}

struct Marker {
    previous: bool,
}

impl Marker {
    fn enter() -> Self {
        Self {
            previous: IN_SERVICE_CONTEXT.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for Marker {
    fn drop(&mut self) {
        IN_SERVICE_CONTEXT.with(|flag| flag.set(self.previous));
    }
}

/// Marks the thread as the service context for the duration of every poll.
pub(crate) struct ServiceScope<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> ServiceScope<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self { inner: Box::pin(inner) }
    }
}

impl<F: Future> Future for ServiceScope<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _marker = Marker::enter();
        self.inner.as_mut().poll(cx)
    }
}
