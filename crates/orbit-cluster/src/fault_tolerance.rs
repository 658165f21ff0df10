use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

use orbit_common::protocol::error::{ErrorKind, OrbitError, Result};
use orbit_common::protocol::{Request, Response};
use orbit_common::url::keys;
use orbit_common::Url;

use crate::load_balancer::LoadBalancer;
use crate::sender::{Reply, RequestSender};

pub const FAIL_FAST: &str = "failfast";
pub const BROADCAST: &str = "broadcast";
pub const FAILOVER: &str = "failover";

pub const DEFAULT_RETRIES: u32 = 2;

/// Call policy over load-balanced sender selection.
#[async_trait]
pub trait FaultTolerance: Send + Sync {
    fn name(&self) -> &'static str;

    /// Binds the load balancer and consumer Url. Can only happen once.
    fn bind(&self, load_balancer: Arc<dyn LoadBalancer>, consumer_url: Url) -> Result<()>;

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>>;

    async fn invoke(&self, request: Request) -> Result<Reply>;

    /// Releases the bound load balancer.
    async fn destroy(&self) {
        if let Some(load_balancer) = self.load_balancer() {
            load_balancer.destroy().await;
        }
    }
}

/// State shared by every strategy: set once by `bind`, read-only afterwards.
#[derive(Default)]
struct Binding {
    inner: OnceLock<(Arc<dyn LoadBalancer>, Url)>,
}

impl Binding {
    fn bind(&self, strategy: &str, load_balancer: Arc<dyn LoadBalancer>, url: Url) -> Result<()> {
        self.inner
            .set((load_balancer, url))
            .map_err(|_| OrbitError::Config(format!("{strategy} fault tolerance is already bound")))
    }

    fn get(&self, strategy: &str) -> Result<(&Arc<dyn LoadBalancer>, &Url)> {
        self.inner
            .get()
            .map(|(lb, url)| (lb, url))
            .ok_or_else(|| OrbitError::NotActive(format!("{strategy} fault tolerance (unbound)")))
    }

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.inner.get().map(|(lb, _)| Arc::clone(lb))
    }
}

fn no_provider(request: &Request) -> OrbitError {
    OrbitError::NoProvider(format!(
        "{} (group: {}, version: {})",
        request.interface,
        request.group(),
        request.version()
    ))
}

/// Reconnects initialised senders whose connection dropped. Returns whether
/// any of them is usable again.
async fn revive(load_balancer: &Arc<dyn LoadBalancer>) -> bool {
    let mut revived = false;
    for sender in load_balancer.senders() {
        if sender.is_initialized() && !sender.is_active() && sender.reconnect().await {
            revived = true;
        }
    }
    revived
}

async fn select_one(
    load_balancer: &Arc<dyn LoadBalancer>,
    request: &Request,
) -> Option<Arc<RequestSender>> {
    if let Some(sender) = load_balancer.select_one(request) {
        return Some(sender);
    }
    if revive(load_balancer).await {
        return load_balancer.select_one(request);
    }
    None
}

async fn select_all(
    load_balancer: &Arc<dyn LoadBalancer>,
    request: &Request,
) -> Vec<Arc<RequestSender>> {
    let senders = load_balancer.select_all(request);
    if senders.is_empty() && revive(load_balancer).await {
        return load_balancer.select_all(request);
    }
    senders
}

/// Invokes exactly one selected sender; every error propagates as is.
#[derive(Default)]
pub struct FailFast {
    binding: Binding,
}

impl FailFast {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaultTolerance for FailFast {
    fn name(&self) -> &'static str {
        FAIL_FAST
    }

    fn bind(&self, load_balancer: Arc<dyn LoadBalancer>, consumer_url: Url) -> Result<()> {
        self.binding.bind(FAIL_FAST, load_balancer, consumer_url)
    }

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.binding.load_balancer()
    }

    async fn invoke(&self, request: Request) -> Result<Reply> {
        let (load_balancer, _) = self.binding.get(FAIL_FAST)?;
        let sender = select_one(load_balancer, &request)
            .await
            .ok_or_else(|| no_provider(&request))?;
        sender.send_request(request).await
    }
}

/// Invokes every active sender in selection order.
///
/// A business exception stops the loop and propagates. Any other failure is
/// logged and the loop moves on. The last successful response wins; when every
/// sender failed without a business exception the result is an empty success.
/// Calls are always made synchronously.
#[derive(Default)]
pub struct Broadcast {
    binding: Binding,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaultTolerance for Broadcast {
    fn name(&self) -> &'static str {
        BROADCAST
    }

    fn bind(&self, load_balancer: Arc<dyn LoadBalancer>, consumer_url: Url) -> Result<()> {
        self.binding.bind(BROADCAST, load_balancer, consumer_url)
    }

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.binding.load_balancer()
    }

    async fn invoke(&self, mut request: Request) -> Result<Reply> {
        let (load_balancer, _) = self.binding.get(BROADCAST)?;
        request.is_async = false;

        let senders = select_all(load_balancer, &request).await;
        if senders.is_empty() {
            return Err(no_provider(&request));
        }

        let mut last: Option<Response> = None;
        for sender in senders {
            match sender.send_request(request.clone()).await {
                Ok(reply) => match reply.into_response().await {
                    Ok(response) => last = Some(response),
                    Err(e) => skip(&sender, &e),
                },
                Err(e) if e.is_business() => return Err(e),
                Err(e) => skip(&sender, &e),
            }
        }

        Ok(Reply::Ready(
            last.unwrap_or_else(|| Response::success(request.id, serde_json::Value::Null)),
        ))
    }
}

fn skip(sender: &RequestSender, error: &OrbitError) {
    tracing::warn!(
        provider = %sender.url().identity(),
        error = %error,
        "Broadcast call failed, continuing with next provider"
    );
}

/// Retries transport failures on other providers.
///
/// Makes up to `retries + 1` attempts, each on a sender not tried before in
/// this call. `retries` comes from the request, then the consumer Url, then
/// [`DEFAULT_RETRIES`]. Business exceptions, timeouts and framework errors are
/// never retried.
#[derive(Default)]
pub struct Failover {
    binding: Binding,
}

impl Failover {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaultTolerance for Failover {
    fn name(&self) -> &'static str {
        FAILOVER
    }

    fn bind(&self, load_balancer: Arc<dyn LoadBalancer>, consumer_url: Url) -> Result<()> {
        self.binding.bind(FAILOVER, load_balancer, consumer_url)
    }

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.binding.load_balancer()
    }

    async fn invoke(&self, request: Request) -> Result<Reply> {
        let (load_balancer, url) = self.binding.get(FAILOVER)?;
        let retries = request
            .retries()
            .or_else(|| url.parameter_as(keys::RETRIES))
            .unwrap_or(DEFAULT_RETRIES);

        let mut tried: Vec<String> = Vec::new();
        let mut last_error = None;

        for attempt in 0..=retries {
            let candidates = select_all(load_balancer, &request).await;
            let Some(sender) = candidates
                .into_iter()
                .find(|s| !tried.contains(&s.url().identity()))
            else {
                break;
            };
            tried.push(sender.url().identity());

            match sender.send_request(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.kind() == ErrorKind::Transport => {
                    tracing::warn!(
                        provider = %sender.url().identity(),
                        attempt,
                        error = %e,
                        "Call failed, trying another provider"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| no_provider(&request)))
    }
}
