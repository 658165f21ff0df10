use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::error::Result;
use crate::registry::{same_listener, NotifyListener, Registry};
use crate::url::{keys, Url};

/// In-process push registry.
///
/// Providers register their Urls; every subscriber of the affected interface
/// is notified with the full matching set on each change. A consumer only
/// sees providers with its own group and version.
pub struct MemoryRegistry {
    url: Url,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// interface -> providers, keyed by identity to dedupe re-registration
    providers: HashMap<String, Vec<Url>>,
    /// interface -> (consumer, listener)
    subscribers: HashMap<String, Vec<(Url, Arc<dyn NotifyListener>)>>,
}

impl State {
    fn matching(&self, consumer: &Url) -> Vec<Url> {
        self.providers
            .get(consumer.path())
            .map(|all| {
                all.iter()
                    .filter(|p| p.group() == consumer.group() && p.version() == consumer.version())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_url(Url::new("memory", "localhost", 0, ""))
    }

    pub fn with_url(url: Url) -> Self {
        Self {
            url,
            state: Mutex::new(State::default()),
        }
    }

    /// Current providers of `interface`, in registration order.
    pub async fn providers(&self, interface: &str) -> Vec<Url> {
        self.state
            .lock()
            .await
            .providers
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    async fn notify_all(&self, state: &State, interface: &str) {
        let Some(subscribers) = state.subscribers.get(interface) else {
            return;
        };
        for (consumer, listener) in subscribers {
            let registry_url = self.url.with_parameter(keys::REFER, consumer.to_string());
            listener
                .on_notify(&registry_url, interface, state.matching(consumer))
                .await;
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn register(&self, provider: &Url) -> Result<()> {
        let mut state = self.state.lock().await;
        let entries = state.providers.entry(provider.path().to_string()).or_default();
        let identity = provider.identity();
        match entries.iter_mut().find(|p| p.identity() == identity) {
            Some(existing) => *existing = provider.clone(),
            None => entries.push(provider.clone()),
        }
        tracing::debug!(provider = %identity, "Registered provider");
        self.notify_all(&state, provider.path()).await;
        Ok(())
    }

    async fn deregister(&self, provider: &Url) -> Result<()> {
        let mut state = self.state.lock().await;
        let identity = provider.identity();
        if let Some(entries) = state.providers.get_mut(provider.path()) {
            entries.retain(|p| p.identity() != identity);
        }
        tracing::debug!(provider = %identity, "Deregistered provider");
        self.notify_all(&state, provider.path()).await;
        Ok(())
    }

    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .entry(consumer.path().to_string())
            .or_default()
            .push((consumer.clone(), Arc::clone(&listener)));

        let registry_url = self.url.with_parameter(keys::REFER, consumer.to_string());
        listener
            .on_notify(&registry_url, consumer.path(), state.matching(consumer))
            .await;
        Ok(())
    }

    async fn unsubscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(subscribers) = state.subscribers.get_mut(consumer.path()) {
            subscribers.retain(|(c, l)| !(c.identity() == consumer.identity() && same_listener(l, &listener)));
        }
        Ok(())
    }
}
