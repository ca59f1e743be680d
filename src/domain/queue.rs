use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Span;
use url::Url;
use uuid::Uuid;

use super::{ResolutionResult, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Resolve,
    Reconsider,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Resolve => f.write_str("resolve"),
            RequestKind::Reconsider => f.write_str("reconsider"),
        }
    }
}

pub type Reply = oneshot::Sender<Result<ResolutionResult>>;

#[derive(Debug)]
pub enum Dispatch {
    /// Not started, or abandoned by a suspension.
    Waiting,
    /// Handed to the resolver during `epoch`.
    InFlight { epoch: u64, task: AbortHandle },
    /// Finished, waiting for the requests ahead of it.
    Done(Result<ResolutionResult>),
}

/// One caller's in-flight resolution.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub url: Url,
    pub kind: RequestKind,
    pub dispatch: Dispatch,
    pub enqueued_at: Instant,
    pub span: Span,
    reply: Reply,
}

impl PendingRequest {
    pub fn new(id: RequestId, url: Url, kind: RequestKind, reply: Reply, span: Span) -> Self {
        Self {
            id,
            url,
            kind,
            dispatch: Dispatch::Waiting,
            enqueued_at: Instant::now(),
            span,
            reply,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.dispatch, Dispatch::InFlight { .. })
    }

    /// Deliver the stored outcome of a finished request.
    fn finish(self) {
        let PendingRequest { dispatch, reply, .. } = self;
        if let Dispatch::Done(result) = dispatch {
            let _ = reply.send(result);
        }
    }

    fn abandon(&mut self) {
        if let Dispatch::InFlight { task, .. } = &self.dispatch {
            task.abort();
        }
        self.dispatch = Dispatch::Waiting;
    }
}

/// Requests waiting for configuration or for the resolver, in enqueue order.
#[derive(Debug, Default)]
pub struct PendingRequestQueue {
    requests: VecDeque<PendingRequest>,
    suspended: bool,
}

impl PendingRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: PendingRequest) -> RequestId {
        let id = request.id;
        self.requests.push_back(request);
        id
    }

    /// Remove `id` without completing it. Returns the removed request, or
    /// `None` if it already left the queue.
    pub fn cancel(&mut self, id: RequestId) -> Option<PendingRequest> {
        let position = self.requests.iter().position(|r| r.id == id)?;
        let mut request = self.requests.remove(position)?;
        if let Dispatch::InFlight { task, .. } = &request.dispatch {
            task.abort();
        }
        request.dispatch = Dispatch::Waiting;
        Some(request)
    }

    /// Stop all progress. Requests stay queued; work handed to the resolver
    /// is abandoned and results not yet delivered are discarded.
    pub fn suspend_all(&mut self) {
        self.suspended = true;
        self.requests.iter_mut().for_each(PendingRequest::abandon);
    }

    /// Allow progress again. Returns how many requests are waiting.
    pub fn resume_all(&mut self) -> usize {
        self.suspended = false;
        self.requests
            .iter()
            .filter(|r| matches!(r.dispatch, Dispatch::Waiting))
            .count()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Oldest request not yet started, unless the queue is suspended.
    pub fn next_waiting(&mut self) -> Option<&mut PendingRequest> {
        if self.suspended {
            return None;
        }
        self.requests
            .iter_mut()
            .find(|r| matches!(r.dispatch, Dispatch::Waiting))
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut PendingRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.iter().any(|r| r.id == id)
    }

    pub fn in_flight(&self) -> usize {
        self.requests.iter().filter(|r| r.is_in_flight()).count()
    }

    /// Deliver finished requests from the front of the queue, preserving
    /// enqueue order. Returns how many were delivered.
    pub fn deliver_completed(&mut self) -> usize {
        let mut delivered = 0;
        while matches!(self.requests.front(), Some(r) if matches!(r.dispatch, Dispatch::Done(_))) {
            if let Some(request) = self.requests.pop_front() {
                tracing::debug!(
                    parent: &request.span,
                    "Completed {} request {} for {} after {:?}",
                    request.kind,
                    request.id,
                    request.url,
                    request.enqueued_at.elapsed()
                );
                request.finish();
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
