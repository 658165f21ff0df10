use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use orbit_common::health::HealthCheckHandler;
use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::registry::Registry;
use orbit_common::shutdown::PROVIDER_PRIORITY;
use orbit_common::transport::{MessageHandler, TransportServer};
use orbit_common::{OrbitContext, Url};

use crate::router::Router;
use crate::service::Service;

/// One listening address: its router, its server and the Urls exported on it.
struct Binding {
    router: Arc<Router>,
    server: Arc<dyn TransportServer>,
    exported: Vec<Url>,
}

/// Exports services, sharing one server per listening address.
///
/// The first service exposed on an address opens the server; later ones are
/// added to the same router. When the last service on an address is
/// withdrawn the server is closed.
pub struct Exposer {
    ctx: Arc<OrbitContext>,
    registry: Option<Arc<dyn Registry>>,
    bindings: Mutex<HashMap<String, Binding>>,
}

impl Exposer {
    /// Creates an exposer and registers its teardown with the context's
    /// shutdown hooks. Exposed Urls are published to `registry` when given.
    pub fn new(ctx: Arc<OrbitContext>, registry: Option<Arc<dyn Registry>>) -> Arc<Self> {
        let exposer = Arc::new(Self {
            ctx: Arc::clone(&ctx),
            registry,
            bindings: Mutex::new(HashMap::new()),
        });

        let weak: Weak<Self> = Arc::downgrade(&exposer);
        ctx.shutdown().register("exposer", PROVIDER_PRIORITY, move || async move {
            if let Some(exposer) = weak.upgrade() {
                exposer.destroy().await;
            }
            Ok::<(), OrbitError>(())
        });
        exposer
    }

    /// Exposes `service` at `provider`. Returns the exported Url, whose port
    /// is the one actually bound (relevant when `provider` asks for port 0).
    pub async fn expose(&self, provider: &Url, service: Arc<dyn Service>) -> Result<Url> {
        let address = provider.address();
        let mut bindings = self.bindings.lock().await;

        let created = !bindings.contains_key(&address);
        if created {
            let binding = self.bind(provider).await?;
            bindings.insert(address.clone(), binding);
        }

        let Some(binding) = bindings.get_mut(&address) else {
            return Err(OrbitError::NotActive(format!("server on {}", address)));
        };
        if let Err(e) = binding.router.register(provider, service) {
            if created {
                if let Some(binding) = bindings.remove(&address) {
                    binding.server.close().await;
                }
            }
            return Err(e);
        }

        let exported = match binding.server.local_addr() {
            Some(local) => provider.with_port(local.port()),
            None => provider.clone(),
        };
        binding.exported.push(exported.clone());
        drop(bindings);

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.register(&exported).await {
                tracing::warn!(url = %exported.identity(), error = %e, "Registration failed, withdrawing service");
                self.roll_back(&address, provider, &exported).await;
                return Err(e);
            }
        }
        tracing::info!(service = %exported.service_key(), url = %exported.identity(), "Service exposed");
        Ok(exported)
    }

    /// Undoes a local export whose registration failed, closing the server
    /// if nothing else is served on it.
    async fn roll_back(&self, address: &str, provider: &Url, exported: &Url) {
        let closing = {
            let mut bindings = self.bindings.lock().await;
            let Some(binding) = bindings.get_mut(address) else {
                return;
            };
            binding.router.unregister(provider);
            let identity = exported.identity();
            binding.exported.retain(|u| u.identity() != identity);
            if binding.router.is_empty() {
                bindings.remove(address)
            } else {
                None
            }
        };
        if let Some(binding) = closing {
            binding.server.close().await;
            tracing::info!(address = %address, "Server closed, no services left");
        }
    }

    async fn bind(&self, provider: &Url) -> Result<Binding> {
        let router = Arc::new(Router::new(provider.address()));
        let handler: Arc<dyn MessageHandler> =
            Arc::new(HealthCheckHandler::new(Arc::clone(&router)));

        let transport = self.ctx.transport_for(provider)?;
        let codec = self.ctx.codec_for(provider)?;
        let server = transport.server(provider, codec, handler)?;
        server.open().await?;

        tracing::info!(
            address = %provider.address(),
            local_addr = ?server.local_addr(),
            transport = transport.name(),
            "Server opened"
        );
        Ok(Binding {
            router,
            server,
            exported: Vec::new(),
        })
    }

    /// Finds the binding a Url belongs to: by requested address, or by the
    /// exported Url when the caller passes back what `expose` returned.
    fn binding_key(bindings: &HashMap<String, Binding>, provider: &Url) -> Option<String> {
        let address = provider.address();
        if bindings.contains_key(&address) {
            return Some(address);
        }
        let identity = provider.identity();
        bindings
            .iter()
            .find(|(_, b)| b.exported.iter().any(|u| u.identity() == identity))
            .map(|(key, _)| key.clone())
    }

    /// Withdraws the service at `provider`. Closes the server when it was the
    /// last one on its address. Returns whether anything was withdrawn.
    pub async fn cancel_expose(&self, provider: &Url) -> Result<bool> {
        let mut bindings = self.bindings.lock().await;
        let Some(key) = Self::binding_key(&bindings, provider) else {
            return Ok(false);
        };
        let Some(binding) = bindings.get_mut(&key) else {
            return Ok(false);
        };

        if !binding.router.unregister(provider) {
            return Ok(false);
        }
        let service_key = provider.service_key();
        let (withdrawn, kept): (Vec<Url>, Vec<Url>) = std::mem::take(&mut binding.exported)
            .into_iter()
            .partition(|u| u.service_key() == service_key);
        binding.exported = kept;

        let closing = if binding.router.is_empty() {
            bindings.remove(&key)
        } else {
            None
        };
        drop(bindings);

        if let Some(registry) = &self.registry {
            for url in &withdrawn {
                registry.deregister(url).await?;
            }
        }
        if let Some(binding) = closing {
            binding.server.close().await;
            tracing::info!(address = %key, "Server closed, no services left");
        }
        Ok(true)
    }

    /// Number of open servers.
    pub async fn servers(&self) -> usize {
        self.bindings.lock().await.len()
    }

    /// The bound socket address of the server for `address`, if any.
    pub async fn local_addr(&self, address: &str) -> Option<SocketAddr> {
        self.bindings
            .lock()
            .await
            .get(address)
            .and_then(|b| b.server.local_addr())
    }

    pub async fn router(&self, address: &str) -> Option<Arc<Router>> {
        self.bindings
            .lock()
            .await
            .get(address)
            .map(|b| Arc::clone(&b.router))
    }

    /// Withdraws everything and closes every server.
    pub async fn destroy(&self) {
        let bindings = std::mem::take(&mut *self.bindings.lock().await);
        for (address, binding) in bindings {
            if let Some(registry) = &self.registry {
                for url in &binding.exported {
                    if let Err(e) = registry.deregister(url).await {
                        tracing::warn!(url = %url.identity(), error = %e, "Failed to deregister");
                    }
                }
            }
            binding.server.close().await;
            tracing::info!(address = %address, "Server closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::service::{arg, MethodTable};
    use orbit_common::codec::{Codec, CodecKind};
    use orbit_common::health;
    use orbit_common::protocol::Request;
    use orbit_common::registry::MemoryRegistry;
    use orbit_common::serialize::JsonSerializer;
    use orbit_common::transport::{TcpClient, TransportClient};
    use serde_json::json;
    use std::time::Duration;

    fn echo(prefix: &'static str) -> Arc<dyn Service> {
        Arc::new(MethodTable::new().sync_method("echo", &["String"], move |args| {
            let text: String = arg(&args, 0)?;
            Ok(json!(format!("{}{}", prefix, text)))
        }))
    }

    async fn client(exported: &Url) -> TcpClient {
        let client = TcpClient::new(
            exported.clone(),
            Codec::new(CodecKind::Framed, Arc::new(JsonSerializer)),
        );
        client.open().await.unwrap();
        client
    }

    async fn call(client: &TcpClient, interface: &str, text: &str) -> orbit_common::Response {
        let request = Request::new(interface, "echo")
            .with_parameter_types(&["String"])
            .with_args(vec![json!(text)]);
        client.request(request).unwrap().wait().await.unwrap()
    }

    #[tokio::test]
    async fn test_services_share_one_server_per_address() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), None);

        let a = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        let b = ServiceConfig::new("demo.B").bind("127.0.0.1", 0).to_url();
        let exported_a = exposer.expose(&a, echo("a:")).await.unwrap();
        let exported_b = exposer.expose(&b, echo("b:")).await.unwrap();

        assert_eq!(exposer.servers().await, 1);
        assert_ne!(exported_a.port(), 0);
        assert_eq!(exported_a.port(), exported_b.port());

        let client = client(&exported_a).await;
        assert_eq!(call(&client, "demo.A", "x").await.result, Some(json!("a:x")));
        assert_eq!(call(&client, "demo.B", "y").await.result, Some(json!("b:y")));

        let missing = call(&client, "demo.C", "z").await.exception.unwrap();
        assert!(!missing.is_business());
        assert!(missing.message.contains("demo.C"));

        client.close().await;
        exposer.destroy().await;
    }

    #[tokio::test]
    async fn test_health_probe_is_answered() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), None);
        let url = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        let exported = exposer.expose(&url, echo("")).await.unwrap();

        let client = client(&exported).await;
        client.check_health(Duration::from_secs(1)).await.unwrap();
        let response = client.request(health::create_request()).unwrap().wait().await.unwrap();
        assert!(response.is_success());

        client.close().await;
        exposer.destroy().await;
    }

    #[tokio::test]
    async fn test_duplicate_expose_fails_and_keeps_server() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), None);
        let url = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        exposer.expose(&url, echo("")).await.unwrap();

        assert!(exposer.expose(&url, echo("")).await.is_err());
        assert_eq!(exposer.servers().await, 1);
        exposer.destroy().await;
    }

    #[tokio::test]
    async fn test_last_cancel_closes_server() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), None);
        let a = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        let b = ServiceConfig::new("demo.B").bind("127.0.0.1", 0).to_url();
        let exported_a = exposer.expose(&a, echo("")).await.unwrap();
        exposer.expose(&b, echo("")).await.unwrap();

        assert!(exposer.cancel_expose(&exported_a).await.unwrap());
        assert!(!exposer.cancel_expose(&exported_a).await.unwrap());
        assert_eq!(exposer.servers().await, 1);

        assert!(exposer.cancel_expose(&b).await.unwrap());
        assert_eq!(exposer.servers().await, 0);

        let refused = TcpClient::new(
            exported_a.with_parameter("connect.timeout", "200"),
            Codec::new(CodecKind::Framed, Arc::new(JsonSerializer)),
        );
        assert!(refused.open().await.is_err());
    }

    #[tokio::test]
    async fn test_registry_sees_exposed_urls() {
        let registry = Arc::new(MemoryRegistry::new());
        let shared: Arc<dyn Registry> = registry.clone();
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), Some(shared));
        let url = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();

        let exported = exposer.expose(&url, echo("")).await.unwrap();
        assert_eq!(registry.providers("demo.A").await, vec![exported.clone()]);

        exposer.cancel_expose(&exported).await.unwrap();
        assert!(registry.providers("demo.A").await.is_empty());
    }

    /// Refuses to register providers of one interface.
    struct Refusing(Url, &'static str);

    #[async_trait::async_trait]
    impl Registry for Refusing {
        fn url(&self) -> &Url {
            &self.0
        }

        async fn register(&self, provider: &Url) -> Result<()> {
            if provider.interface() == self.1 {
                return Err(OrbitError::Connection("registry unreachable".into()));
            }
            Ok(())
        }

        async fn deregister(&self, _provider: &Url) -> Result<()> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _consumer: &Url,
            _listener: Arc<dyn orbit_common::registry::NotifyListener>,
        ) -> Result<()> {
            Ok(())
        }

        async fn unsubscribe(
            &self,
            _consumer: &Url,
            _listener: Arc<dyn orbit_common::registry::NotifyListener>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn refusing(interface: &'static str) -> Arc<dyn Registry> {
        Arc::new(Refusing(Url::parse("memory://0.0.0.0:0/registry").unwrap(), interface))
    }

    #[tokio::test]
    async fn test_failed_registration_withdraws_service() {
        let registry = refusing("demo.A");
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), Some(registry));
        let url = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();

        let err = exposer.expose(&url, echo("")).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(exposer.servers().await, 0, "server opened for the export is closed");
        assert!(exposer.router(&url.address()).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_other_services() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), Some(refusing("demo.B")));
        let a = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        let b = ServiceConfig::new("demo.B").bind("127.0.0.1", 0).to_url();
        let exported_a = exposer.expose(&a, echo("a:")).await.unwrap();
        assert!(exposer.expose(&b, echo("b:")).await.is_err());

        assert_eq!(exposer.servers().await, 1);
        let router = exposer.router(&a.address()).await.unwrap();
        assert_eq!(router.len(), 1);
        let client = client(&exported_a).await;
        assert_eq!(call(&client, "demo.A", "x").await.result, Some(json!("a:x")));
        assert!(!call(&client, "demo.B", "y").await.is_success());

        client.close().await;
        exposer.destroy().await;
    }

    #[tokio::test]
    async fn test_shutdown_hook_closes_servers() {
        let ctx = OrbitContext::with_defaults().unwrap();
        let exposer = Exposer::new(Arc::clone(&ctx), None);
        let url = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        exposer.expose(&url, echo("")).await.unwrap();

        assert_eq!(ctx.shutdown().run().await, 0);
        assert_eq!(exposer.servers().await, 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let exposer = Exposer::new(OrbitContext::with_defaults().unwrap(), None);
        let first = ServiceConfig::new("demo.A").bind("127.0.0.1", 0).to_url();
        let exported = exposer.expose(&first, echo("")).await.unwrap();

        let other = Exposer::new(OrbitContext::with_defaults().unwrap(), None);
        let taken = ServiceConfig::new("demo.B").bind("127.0.0.1", exported.port()).to_url();
        let err = other.expose(&taken, echo("")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind to"));
        assert_eq!(other.servers().await, 0);

        exposer.destroy().await;
    }
}
