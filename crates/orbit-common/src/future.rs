//! Pending-response handle.
//!
//! An [`RpcFuture`] is created when a request is written and completed by the
//! connection's read loop when the matching response arrives. Completion
//! listeners run inline on the completing task, so they must be short and must
//! not block.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::protocol::error::{OrbitError, Result};
use crate::protocol::{RequestId, Response};

type Listener = Box<dyn FnOnce(&Result<Response>) + Send>;

enum State {
    Pending(Vec<Listener>),
    Done(Arc<Result<Response>>),
}

struct Inner {
    id: RequestId,
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Clone)]
pub struct RpcFuture {
    inner: Arc<Inner>,
}

impl RpcFuture {
    pub fn new(id: RequestId) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                state: Mutex::new(State::Pending(Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    /// A future that is already resolved.
    pub fn ready(id: RequestId, outcome: Result<Response>) -> Self {
        let future = Self::new(id);
        future.finish(outcome);
        future
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Done(_))
    }

    /// Resolves the future. Returns `false` if it was already resolved, in
    /// which case `outcome` is dropped.
    pub fn complete(&self, response: Response) -> bool {
        self.finish(Ok(response))
    }

    pub fn fail(&self, error: OrbitError) -> bool {
        self.finish(Err(error))
    }

    /// Cancels locally. The remote side is not told; a response that arrives
    /// later is dropped.
    pub fn cancel(&self) -> bool {
        self.finish(Err(OrbitError::Cancelled))
    }

    fn finish(&self, outcome: Result<Response>) -> bool {
        let outcome = Arc::new(outcome);
        let listeners = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending(listeners) => {
                    let listeners = std::mem::take(listeners);
                    *state = State::Done(Arc::clone(&outcome));
                    listeners
                }
            }
        };

        for listener in listeners {
            listener(&*outcome);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Registers a completion callback; runs it immediately if already done.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<Response>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending(listeners) => {
                    listeners.push(Box::new(listener));
                    return;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };
        listener(&*outcome);
    }

    fn outcome(&self) -> Option<Result<Response>> {
        match &*self.inner.state.lock() {
            State::Pending(_) => None,
            State::Done(outcome) => Some(match outcome.as_ref() {
                Ok(response) => Ok(response.clone()),
                Err(e) => Err(clone_error(e)),
            }),
        }
    }

    /// Waits until the future resolves.
    pub async fn wait(&self) -> Result<Response> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Waits at most `timeout`, failing with [`OrbitError::Timeout`].
    ///
    /// A timeout does not resolve the future; a late response still completes
    /// it for other waiters.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrbitError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

/// Errors are not `Clone` (they wrap io and serde errors); waiters each get a
/// copy that keeps the classification.
fn clone_error(err: &OrbitError) -> OrbitError {
    match err {
        OrbitError::Business(e) => OrbitError::Business(e.clone()),
        OrbitError::RemoteFramework(m) => OrbitError::RemoteFramework(m.clone()),
        OrbitError::Timeout(ms) => OrbitError::Timeout(*ms),
        OrbitError::Cancelled => OrbitError::Cancelled,
        OrbitError::Connection(m) => OrbitError::Connection(m.clone()),
        OrbitError::NotActive(m) => OrbitError::NotActive(m.clone()),
        OrbitError::Provider { url, source } => OrbitError::Provider {
            url: url.clone(),
            source: Box::new(clone_error(source)),
        },
        OrbitError::Invocation { url, source } => OrbitError::Invocation {
            url: url.clone(),
            source: Box::new(clone_error(source)),
        },
        OrbitError::NoProvider(m) => OrbitError::NoProvider(m.clone()),
        other if other.is_transport() => OrbitError::Transport(other.to_string()),
        other => OrbitError::Codec(other.to_string()),
    }
}

impl std::fmt::Debug for RpcFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcFuture")
            .field("id", &self.inner.id)
            .field("done", &self.is_done())
            .finish()
    }
}
