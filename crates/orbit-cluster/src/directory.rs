//! Registry listener that keeps a load balancer's sender list in step with the
//! notified provider set.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use orbit_common::protocol::error::Result;
use orbit_common::registry::NotifyListener;
use orbit_common::{OrbitContext, Url};

use crate::health_checker::{HealthCheckConfig, HealthChecker};
use crate::load_balancer::LoadBalancer;
use crate::sender::RequestSender;

pub struct ProviderDirectory {
    ctx: Arc<OrbitContext>,
    consumer_url: Url,
    load_balancer: Arc<dyn LoadBalancer>,
    senders: Mutex<HashMap<String, Arc<RequestSender>>>,
    health_checker: Option<Arc<HealthChecker>>,
}

impl ProviderDirectory {
    /// A directory for `consumer_url`. A health checker is attached when the
    /// consumer Url carries `health.interval`.
    pub fn new(
        ctx: Arc<OrbitContext>,
        consumer_url: Url,
        load_balancer: Arc<dyn LoadBalancer>,
    ) -> Self {
        let health_checker =
            HealthCheckConfig::from_url(&consumer_url).map(|c| Arc::new(HealthChecker::new(c)));
        Self {
            ctx,
            consumer_url,
            load_balancer,
            senders: Mutex::new(HashMap::new()),
            health_checker,
        }
    }

    pub fn consumer_url(&self) -> &Url {
        &self.consumer_url
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn health_checker(&self) -> Option<&Arc<HealthChecker>> {
        self.health_checker.as_ref()
    }

    pub async fn len(&self) -> usize {
        self.senders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Provider Urls inherit the consumer's call options unless they set
    /// their own.
    fn provider_url(&self, provider: &Url) -> Url {
        let inherited = self
            .consumer_url
            .parameters()
            .iter()
            .filter(|(key, _)| provider.parameter(key).is_none())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        provider.with_parameters(inherited)
    }

    async fn connect(&self, provider: &Url) -> Result<Arc<RequestSender>> {
        let sender = Arc::new(RequestSender::from_context(&self.ctx, &self.provider_url(provider))?);
        sender.init().await?;
        Ok(sender)
    }

    /// Applies a full provider set: keeps live senders that are still listed,
    /// opens senders for new (or dead) providers, destroys the rest, then
    /// refreshes the load balancer in notification order.
    pub async fn apply(&self, providers: Vec<Url>) {
        let mut senders = self.senders.lock().await;
        let mut previous = std::mem::take(&mut *senders);
        let mut ordered = Vec::with_capacity(providers.len());

        for provider in &providers {
            let identity = provider.identity();
            if senders.contains_key(&identity) {
                continue;
            }

            if let Some(existing) = previous.remove(&identity) {
                if existing.is_active() {
                    senders.insert(identity, Arc::clone(&existing));
                    ordered.push(existing);
                    continue;
                }
                tracing::debug!(provider = %identity, "Replacing inactive sender");
                self.release(&existing).await;
            }

            match self.connect(provider).await {
                Ok(sender) => {
                    if let Some(checker) = &self.health_checker {
                        checker.watch(Arc::clone(&sender));
                    }
                    senders.insert(identity, Arc::clone(&sender));
                    ordered.push(sender);
                }
                Err(e) => {
                    tracing::warn!(provider = %identity, error = %e, "Failed to connect to provider");
                }
            }
        }

        for (identity, stale) in previous {
            tracing::info!(provider = %identity, "Provider removed");
            self.release(&stale).await;
        }

        tracing::debug!(
            interface = %self.consumer_url.interface(),
            active = ordered.len(),
            listed = providers.len(),
            "Provider set applied"
        );
        self.load_balancer.refresh(ordered);
    }

    async fn release(&self, sender: &Arc<RequestSender>) {
        if let Some(checker) = &self.health_checker {
            checker.unwatch(sender.url());
        }
        sender.destroy().await;
    }

    /// Starts the health checker, if one is attached.
    pub fn start_health_checks(&self) {
        if let Some(checker) = &self.health_checker {
            checker.start();
        }
    }

    /// Stops health checks and destroys every sender.
    pub async fn destroy(&self) {
        if let Some(checker) = &self.health_checker {
            checker.stop();
        }
        let senders = std::mem::take(&mut *self.senders.lock().await);
        self.load_balancer.refresh(Vec::new());
        for sender in senders.values() {
            self.release(sender).await;
        }
    }
}

#[async_trait]
impl NotifyListener for ProviderDirectory {
    async fn on_notify(&self, registry_url: &Url, path: &str, providers: Vec<Url>) {
        if path != self.consumer_url.interface() {
            tracing::debug!(registry = %registry_url, path, "Ignoring notification for another interface");
            return;
        }
        tracing::info!(
            registry = %registry_url.identity(),
            path,
            count = providers.len(),
            "Provider set notified"
        );
        self.apply(providers).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_tolerance::{FailFast, FaultTolerance};
    use crate::load_balancer::RoundRobinLoadBalancer;
    use orbit_common::protocol::error::OrbitError;
    use orbit_common::protocol::{Request, Response};
    use orbit_common::registry::{MemoryRegistry, Registry, StaticRegistry};
    use orbit_common::transport::{MessageHandler, TcpServer, TransportServer};
    use orbit_common::codec::{Codec, CodecKind};
    use orbit_common::serialize::JsonSerializer;
    use serde_json::json;

    struct Answer(u16);

    #[async_trait]
    impl MessageHandler for Answer {
        async fn handle(&self, request: Request) -> Response {
            Response::success(request.id, json!(self.0))
        }
    }

    async fn provider(tag: u16) -> TcpServer {
        let url = Url::parse("orbit://127.0.0.1:0/demo.Echo").unwrap();
        let codec = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer));
        let server = TcpServer::new(url, codec, Arc::new(Answer(tag)));
        server.open().await.unwrap();
        server
    }

    fn provider_url(server: &TcpServer) -> Url {
        let addr = server.local_addr().unwrap();
        Url::new("orbit", addr.ip().to_string(), addr.port(), "demo.Echo")
    }

    fn directory(consumer: &str) -> Arc<ProviderDirectory> {
        let ctx = OrbitContext::with_defaults().unwrap();
        Arc::new(ProviderDirectory::new(
            ctx,
            Url::parse(consumer).unwrap(),
            Arc::new(RoundRobinLoadBalancer::new()),
        ))
    }

    #[tokio::test]
    async fn test_static_subscribe_builds_active_senders() {
        let a = provider(1).await;
        let b = provider(2).await;
        let registry = StaticRegistry::new(&[
            provider_url(&a).address(),
            provider_url(&b).address(),
        ])
        .unwrap();

        let directory = directory("consumer://127.0.0.1:0/demo.Echo");
        registry
            .subscribe(directory.consumer_url(), directory.clone())
            .await
            .unwrap();

        assert_eq!(directory.len().await, 2);
        let senders = directory.load_balancer().senders();
        assert!(senders.iter().all(|s| s.is_active()));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let sender = directory.load_balancer().select_one(&Request::new("demo.Echo", "echo")).unwrap();
            let reply = sender.send_request(Request::new("demo.Echo", "echo")).await.unwrap();
            seen.push(reply.into_response().await.unwrap().result.unwrap());
        }
        seen.sort_by_key(|v| v.as_u64());
        assert_eq!(seen, vec![json!(1), json!(2)]);

        directory.destroy().await;
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_notify_reuses_and_destroys() {
        let a = provider(1).await;
        let b = provider(2).await;
        let directory = directory("consumer://127.0.0.1:0/demo.Echo");

        directory.apply(vec![provider_url(&a), provider_url(&b)]).await;
        let first: Vec<_> = directory.load_balancer().senders();
        assert_eq!(first.len(), 2);

        directory.apply(vec![provider_url(&b)]).await;
        let second = directory.load_balancer().senders();
        assert_eq!(second.len(), 1);
        assert!(Arc::ptr_eq(&second[0], &first[1]), "live sender is reused");
        assert!(!first[0].is_active(), "vanished provider is destroyed");

        directory.destroy().await;
        assert!(directory.is_empty().await);
        assert!(!first[1].is_active());
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_skipped() {
        let a = provider(1).await;
        let directory = directory("consumer://127.0.0.1:0/demo.Echo?connect.timeout=200");
        let dead = Url::parse("orbit://127.0.0.1:1/demo.Echo").unwrap();

        directory.apply(vec![dead, provider_url(&a)]).await;
        assert_eq!(directory.len().await, 1);
        assert_eq!(directory.load_balancer().senders()[0].url().port(), provider_url(&a).port());

        directory.destroy().await;
        a.close().await;
    }

    #[tokio::test]
    async fn test_memory_registry_pushes_changes() {
        let a = provider(1).await;
        let b = provider(2).await;
        let registry = MemoryRegistry::new();
        let directory = directory("consumer://127.0.0.1:0/demo.Echo");

        registry.register(&provider_url(&a)).await.unwrap();
        registry
            .subscribe(directory.consumer_url(), directory.clone())
            .await
            .unwrap();
        assert_eq!(directory.len().await, 1);

        registry.register(&provider_url(&b)).await.unwrap();
        assert_eq!(directory.len().await, 2);

        registry.deregister(&provider_url(&a)).await.unwrap();
        assert_eq!(directory.len().await, 1);
        assert_eq!(directory.load_balancer().senders()[0].url().port(), provider_url(&b).port());

        directory.destroy().await;
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_health_checker_attached_from_url() {
        let a = provider(1).await;
        let directory = directory("consumer://127.0.0.1:0/demo.Echo?health.interval=50");
        directory.apply(vec![provider_url(&a)]).await;

        let checker = directory.health_checker().unwrap();
        assert_eq!(checker.watched(), 1);
        let report = checker.sweep().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.failed, 0);

        directory.start_health_checks();
        assert!(checker.is_running());
        directory.destroy().await;
        assert!(!checker.is_running());
        assert_eq!(checker.watched(), 0);
        a.close().await;
    }

    #[tokio::test]
    async fn test_provider_restarted_on_same_port_is_reached_again() {
        let a = provider(1).await;
        let url = provider_url(&a);
        let registry = StaticRegistry::new(&[url.address()]).unwrap();
        let directory = directory("consumer://127.0.0.1:0/demo.Echo");
        registry
            .subscribe(directory.consumer_url(), directory.clone())
            .await
            .unwrap();

        let fail_fast = FailFast::new();
        fail_fast
            .bind(Arc::clone(directory.load_balancer()), directory.consumer_url().clone())
            .unwrap();

        a.close().await;
        let sender = directory.load_balancer().senders()[0].clone();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while sender.is_active() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let err = fail_fast.invoke(Request::new("demo.Echo", "echo")).await.unwrap_err();
        assert!(matches!(err, OrbitError::NoProvider(_)));

        let codec = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer));
        let restarted = TcpServer::new(url, codec, Arc::new(Answer(7)));
        restarted.open().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        let reply = fail_fast.invoke(Request::new("demo.Echo", "echo")).await.unwrap();
        assert_eq!(reply.into_response().await.unwrap().result, Some(json!(7)));
        assert!(sender.is_active());

        directory.destroy().await;
        restarted.close().await;
    }

    #[tokio::test]
    async fn test_other_interface_is_ignored() {
        let a = provider(1).await;
        let directory = directory("consumer://127.0.0.1:0/demo.Echo");
        directory
            .on_notify(&Url::parse("static://0.0.0.0:0/x").unwrap(), "demo.Other", vec![provider_url(&a)])
            .await;
        assert!(directory.is_empty().await);
        a.close().await;
    }
}
