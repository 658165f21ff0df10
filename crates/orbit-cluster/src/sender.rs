use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::protocol::{Request, Response};
use orbit_common::transport::{ClientConfig, TransportClient};
use orbit_common::{OrbitContext, RpcFuture, Url};

/// Outcome of a send: a resolved response for synchronous calls, the pending
/// future for asynchronous ones.
#[derive(Debug)]
pub enum Reply {
    Ready(Response),
    Pending(RpcFuture),
}

impl Reply {
    /// Waits for the response if needed.
    pub async fn into_response(self) -> Result<Response> {
        match self {
            Reply::Ready(response) => Ok(response),
            Reply::Pending(future) => future.wait().await,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reply::Pending(_))
    }
}

/// Minimum spacing between reconnect attempts on one sender.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Counts one request as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cancels a synchronous call's future if the caller stops waiting.
struct CancelOnDrop(RpcFuture);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Per-provider dispatch unit.
///
/// Wraps exactly one transport client, tracks whether the provider is usable
/// and how many requests are currently in flight on it.
pub struct RequestSender {
    url: Url,
    client: Arc<dyn TransportClient>,
    initialized: AtomicBool,
    active: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    request_timeout: Duration,
    last_reconnect: Mutex<Option<Instant>>,
}

impl RequestSender {
    pub fn new(url: Url, client: Arc<dyn TransportClient>) -> Self {
        let request_timeout = ClientConfig::from_url(&url).request_timeout;
        Self {
            url,
            client,
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            request_timeout,
            last_reconnect: Mutex::new(None),
        }
    }

    /// Builds a sender whose client uses the transport and codec `url` asks for.
    pub fn from_context(ctx: &OrbitContext, url: &Url) -> Result<Self> {
        let transport = ctx.transport_for(url)?;
        let codec = ctx.codec_for(url)?;
        let client = transport.client(url, codec)?;
        Ok(Self::new(url.clone(), client))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn client(&self) -> &Arc<dyn TransportClient> {
        &self.client
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Usable for new requests: initialised, not destroyed, connection up.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.client.is_active()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Opens the client. A second call logs and returns without reopening.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            tracing::debug!(provider = %self.url.identity(), "Sender already initialized");
            return Ok(());
        }

        match self.client.open().await {
            Ok(()) => {
                self.active.store(true, Ordering::Release);
                tracing::info!(provider = %self.url.identity(), "Sender initialized");
                Ok(())
            }
            Err(e) => {
                self.initialized.store(false, Ordering::Release);
                Err(e.at_provider(self.url.to_string()))
            }
        }
    }

    /// Sends `request` to this provider.
    ///
    /// Synchronous requests wait up to the request timeout (request option,
    /// then provider Url option, then the default) and resolve to
    /// [`Reply::Ready`]; a business exception response becomes
    /// [`OrbitError::Business`]. Asynchronous requests return the pending
    /// future immediately.
    pub async fn send_request(&self, request: Request) -> Result<Reply> {
        if !self.is_active() {
            return Err(OrbitError::NotActive(format!("sender for {}", self.url.identity())));
        }

        let timeout = request
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.request_timeout);
        let is_async = request.is_async;

        let guard = InFlight::enter(&self.in_flight);
        let future = self
            .client
            .request(request)
            .map_err(|e| e.at_provider(self.url.to_string()))?;

        if is_async {
            future.add_listener(move |_| drop(guard));
            return Ok(Reply::Pending(future));
        }

        let outcome = {
            let _abandon = CancelOnDrop(future.clone());
            future.wait_timeout(timeout).await
        };
        drop(guard);

        match outcome {
            Ok(response) => response
                .check()
                .map(Reply::Ready)
                .map_err(|e| e.at_provider(self.url.to_string())),
            Err(e) => Err(e.at_provider(self.url.to_string())),
        }
    }

    /// Re-opens the client of an initialised sender that lost its connection.
    ///
    /// Returns whether the sender is active afterwards. Attempts on one sender
    /// are spaced by a short backoff; a destroyed sender is never revived.
    pub async fn reconnect(&self) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        if self.client.is_active() {
            return true;
        }
        {
            let mut last = self.last_reconnect.lock();
            let now = Instant::now();
            if last.is_some_and(|at| now.duration_since(at) < RECONNECT_BACKOFF) {
                return false;
            }
            *last = Some(now);
        }

        match self.client.open().await {
            Ok(()) => {
                tracing::info!(provider = %self.url.identity(), "Sender reconnected");
                self.is_active()
            }
            Err(e) => {
                tracing::debug!(provider = %self.url.identity(), error = %e, "Reconnect failed");
                false
            }
        }
    }

    /// Probes the provider through the health-check sentinel.
    pub async fn check_health(&self, timeout: Duration) -> Result<()> {
        self.client
            .check_health(timeout)
            .await
            .map_err(|e| e.at_provider(self.url.to_string()))
    }

    /// Marks the sender inactive and closes its client.
    pub async fn destroy(&self) {
        self.active.store(false, Ordering::Release);
        self.client.close().await;
        tracing::debug!(provider = %self.url.identity(), "Sender destroyed");
    }
}

impl std::fmt::Debug for RequestSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSender")
            .field("url", &self.url.identity())
            .field("active", &self.is_active())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
