//! Provider discovery contract.
//!
//! A [`Registry`] publishes provider Urls and pushes the active provider set
//! of an interface to subscribed consumers. Notifications are push-only: the
//! initial set is delivered synchronously inside [`Registry::subscribe`], later
//! changes arrive as further [`NotifyListener::on_notify`] calls.

pub mod memory;
pub mod static_registry;

use async_trait::async_trait;
use std::sync::Arc;

use crate::protocol::error::Result;
use crate::url::Url;

pub use memory::MemoryRegistry;
pub use static_registry::StaticRegistry;

/// Receives provider-set updates.
#[async_trait]
pub trait NotifyListener: Send + Sync {
    /// `path` is the interface name; `providers` is the complete current set,
    /// not a delta.
    async fn on_notify(&self, registry_url: &Url, path: &str, providers: Vec<Url>);
}

#[async_trait]
pub trait Registry: Send + Sync {
    fn url(&self) -> &Url;

    async fn register(&self, provider: &Url) -> Result<()>;

    async fn deregister(&self, provider: &Url) -> Result<()>;

    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()>;

    async fn unsubscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()>;
}

/// Two listener handles refer to the same subscriber.
pub(crate) fn same_listener(a: &Arc<dyn NotifyListener>, b: &Arc<dyn NotifyListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
