use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use orbit_cluster::{FaultTolerance, LoadBalancer, ProviderDirectory, Reply};
use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::protocol::Request;
use orbit_common::registry::Registry;
use orbit_common::shutdown::CONSUMER_PRIORITY;
use orbit_common::{OrbitContext, Url};

use crate::config::ReferenceConfig;
use crate::proxy::ServiceProxy;

/// Consumer-side entry point for one remote interface.
///
/// Owns the fault-tolerance strategy, the load balancer bound into it and the
/// provider directory subscribed to the registry.
pub struct ServiceInvoker {
    interface: String,
    consumer_url: Url,
    fault_tolerance: Arc<dyn FaultTolerance>,
    directory: Arc<ProviderDirectory>,
    registry: Arc<dyn Registry>,
    active: AtomicBool,
}

impl ServiceInvoker {
    /// Resolves the named strategies, binds them, subscribes to `registry`
    /// and registers a shutdown hook.
    ///
    /// The registry delivers the initial provider set inside `subscribe`, so
    /// senders for every reachable provider are open when this returns.
    pub async fn init(
        ctx: &Arc<OrbitContext>,
        interface: &str,
        fault_tolerance: &str,
        load_balancer: &str,
        consumer_url: &Url,
        registry: Arc<dyn Registry>,
    ) -> Result<Arc<Self>> {
        let extensions = ctx.extensions();
        let load_balancer = extensions.resolve::<dyn LoadBalancer>(load_balancer)?;
        let fault_tolerance = extensions.resolve::<dyn FaultTolerance>(fault_tolerance)?;

        let consumer_url = if consumer_url.interface() == interface {
            consumer_url.clone()
        } else {
            consumer_url.with_path(interface)
        };
        fault_tolerance.bind(Arc::clone(&load_balancer), consumer_url.clone())?;

        let directory = Arc::new(ProviderDirectory::new(
            Arc::clone(ctx),
            consumer_url.clone(),
            load_balancer,
        ));
        registry.subscribe(&consumer_url, directory.clone()).await?;
        directory.start_health_checks();

        let invoker = Arc::new(Self {
            interface: interface.to_string(),
            consumer_url,
            fault_tolerance,
            directory,
            registry,
            active: AtomicBool::new(true),
        });

        let weak: Weak<Self> = Arc::downgrade(&invoker);
        ctx.shutdown().register(
            format!("invoker:{}", invoker.consumer_url.identity()),
            CONSUMER_PRIORITY,
            move || async move {
                if let Some(invoker) = weak.upgrade() {
                    invoker.destroy().await;
                }
                Ok::<(), OrbitError>(())
            },
        );

        let providers = invoker.directory.len().await;
        tracing::info!(
            interface,
            cluster = invoker.fault_tolerance.name(),
            providers,
            "Service invoker initialized"
        );
        Ok(invoker)
    }

    /// Same as [`ServiceInvoker::init`] with strategy names taken from the
    /// consumer Url (`cluster`, `loadbalance`).
    pub async fn from_url(
        ctx: &Arc<OrbitContext>,
        consumer_url: &Url,
        registry: Arc<dyn Registry>,
    ) -> Result<Arc<Self>> {
        let config = ReferenceConfig::from_url(consumer_url);
        Self::init(
            ctx,
            &config.interface,
            &config.fault_tolerance,
            &config.load_balancer,
            consumer_url,
            registry,
        )
        .await
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn consumer_url(&self) -> &Url {
        &self.consumer_url
    }

    pub fn directory(&self) -> &Arc<ProviderDirectory> {
        &self.directory
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn invoke(&self, request: Request) -> Result<Reply> {
        if !self.is_active() {
            return Err(OrbitError::NotActive(format!("service invoker for {}", self.interface)));
        }
        self.fault_tolerance.invoke(request).await
    }

    /// Marks the invoker inactive, unsubscribes and releases every sender.
    /// Later calls do nothing.
    pub async fn destroy(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let listener: Arc<ProviderDirectory> = Arc::clone(&self.directory);
        if let Err(e) = self.registry.unsubscribe(&self.consumer_url, listener).await {
            tracing::warn!(interface = %self.interface, error = %e, "Failed to unsubscribe");
        }
        self.directory.destroy().await;
        self.fault_tolerance.destroy().await;
        tracing::info!(interface = %self.interface, "Service invoker destroyed");
    }
}

/// Cache key: one invoker per interface, group and version.
fn reference_key(url: &Url) -> String {
    format!("{}#{}", url.identity(), url.service_key())
}

/// Hands out one shared [`ServiceInvoker`] per consumer Url identity.
pub struct ReferenceCache {
    ctx: Arc<OrbitContext>,
    registry: Arc<dyn Registry>,
    invokers: Mutex<HashMap<String, Arc<ServiceInvoker>>>,
}

impl ReferenceCache {
    pub fn new(ctx: Arc<OrbitContext>, registry: Arc<dyn Registry>) -> Self {
        Self {
            ctx,
            registry,
            invokers: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<OrbitContext> {
        &self.ctx
    }

    /// The invoker for `config`, initialising it on first use. An invoker
    /// that has been destroyed is replaced.
    pub async fn get(&self, config: &ReferenceConfig) -> Result<Arc<ServiceInvoker>> {
        let url = config.to_url();
        let key = reference_key(&url);

        let mut invokers = self.invokers.lock().await;
        if let Some(invoker) = invokers.get(&key) {
            if invoker.is_active() {
                return Ok(Arc::clone(invoker));
            }
        }

        let invoker = ServiceInvoker::init(
            &self.ctx,
            &config.interface,
            &config.fault_tolerance,
            &config.load_balancer,
            &url,
            Arc::clone(&self.registry),
        )
        .await?;
        invokers.insert(key, Arc::clone(&invoker));
        Ok(invoker)
    }

    /// A proxy over the cached invoker for `config`.
    pub async fn proxy(&self, config: &ReferenceConfig) -> Result<ServiceProxy> {
        self.get(config).await.map(ServiceProxy::new)
    }

    pub async fn len(&self) -> usize {
        self.invokers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Destroys and forgets the invoker for `config`, if cached.
    pub async fn remove(&self, config: &ReferenceConfig) -> bool {
        let removed = self
            .invokers
            .lock()
            .await
            .remove(&reference_key(&config.to_url()));
        match removed {
            Some(invoker) => {
                invoker.destroy().await;
                true
            }
            None => false,
        }
    }

    pub async fn destroy_all(&self) {
        let invokers = std::mem::take(&mut *self.invokers.lock().await);
        for invoker in invokers.into_values() {
            invoker.destroy().await;
        }
    }
}
