use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::error::{OrbitError, Result};
use crate::registry::{NotifyListener, Registry};
use crate::url::{keys, Url};

/// Url option listing the fixed provider addresses (`host:port,host:port`).
pub const PROVIDERS_KEY: &str = "providers";

/// Protocol stamped on provider Urls derived from the fixed address list.
pub const DEFAULT_PROVIDER_PROTOCOL: &str = "orbit";

/// Direct-connect registry.
///
/// Treats a fixed list of `host:port` pairs as always active and answers
/// every subscribe and unsubscribe by notifying that list right away.
/// Notifications for one consumer are serialised; the per-consumer lock only
/// lives while a call is in progress. Provider
/// Urls are derived from the consumer Url, so per-consumer options (group,
/// version, codec, timeout...) carry over to every provider.
pub struct StaticRegistry {
    url: Url,
    addresses: Vec<(String, u16)>,
    provider_protocol: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StaticRegistry {
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Result<Self> {
        let addresses = addresses
            .iter()
            .map(|a| parse_address(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let joined = addresses
            .iter()
            .map(|(h, p)| format!("{}:{}", h, p))
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self {
            url: Url::new("static", "localhost", 0, "").with_parameter(PROVIDERS_KEY, joined),
            addresses,
            provider_protocol: DEFAULT_PROVIDER_PROTOCOL.to_string(),
            locks: DashMap::new(),
        })
    }

    /// Builds from `static://anything?providers=h1:p1,h2:p2`.
    pub fn from_url(url: &Url) -> Result<Self> {
        let list = url.parameter(PROVIDERS_KEY).ok_or_else(|| {
            OrbitError::Config(format!("static registry url {} has no '{}' option", url, PROVIDERS_KEY))
        })?;
        let addresses: Vec<&str> = list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let mut registry = Self::new(&addresses)?;
        registry.url = url.clone();
        Ok(registry)
    }

    /// Overrides the protocol of derived provider Urls.
    pub fn with_provider_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.provider_protocol = protocol.into();
        self
    }

    /// The provider set a consumer sees.
    pub fn providers_for(&self, consumer: &Url) -> Vec<Url> {
        self.addresses
            .iter()
            .map(|(host, port)| {
                consumer
                    .with_protocol(self.provider_protocol.clone())
                    .with_host(host.clone())
                    .with_port(*port)
            })
            .collect()
    }

    fn lock_for(&self, consumer: &Url) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(consumer.identity())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drops the consumer's lock once nobody else holds or waits on it.
    fn release_lock(&self, consumer: &Url, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&consumer.identity(), |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn notify(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) {
        let registry_url = self.url.with_parameter(keys::REFER, consumer.to_string());
        listener
            .on_notify(&registry_url, consumer.path(), self.providers_for(consumer))
            .await;
    }
}

fn parse_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| OrbitError::Config(format!("provider address '{}' is not host:port", address)))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| OrbitError::Config(format!("provider address '{}': {}", address, e)))?;
    if host.is_empty() {
        return Err(OrbitError::Config(format!("provider address '{}' has no host", address)));
    }
    Ok((host.to_string(), port))
}

#[async_trait]
impl Registry for StaticRegistry {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn register(&self, provider: &Url) -> Result<()> {
        tracing::debug!(provider = %provider.identity(), "Static registry ignores register");
        Ok(())
    }

    async fn deregister(&self, provider: &Url) -> Result<()> {
        tracing::debug!(provider = %provider.identity(), "Static registry ignores deregister");
        Ok(())
    }

    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let lock = self.lock_for(consumer);
        {
            let _guard = lock.lock().await;
            self.notify(consumer, &listener).await;
        }
        self.release_lock(consumer, lock);
        Ok(())
    }

    async fn unsubscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let lock = self.lock_for(consumer);
        {
            let _guard = lock.lock().await;
            self.notify(consumer, &listener).await;
        }
        self.release_lock(consumer, lock);
        Ok(())
    }
}
