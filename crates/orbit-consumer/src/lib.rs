//! Orbit consumer side.
//!
//! A consumer describes each remote interface with a [`ReferenceConfig`],
//! obtains a shared [`ServiceInvoker`] from a [`ReferenceCache`] and calls
//! methods through a [`ServiceProxy`].
//!
//! ```no_run
//! # async fn demo() -> orbit_common::Result<()> {
//! use orbit_common::registry::StaticRegistry;
//! use orbit_common::OrbitContext;
//! use orbit_consumer::{ReferenceCache, ReferenceConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let ctx = OrbitContext::with_defaults()?;
//! orbit_cluster::register_defaults(&ctx)?;
//!
//! let registry = Arc::new(StaticRegistry::new(&["127.0.0.1:20880"])?);
//! let cache = ReferenceCache::new(ctx.clone(), registry);
//!
//! let echo = cache.proxy(&ReferenceConfig::new("demo.Echo").timeout_ms(1000)).await?;
//! let reply: String = echo.call("echo", &["String"], vec![json!("hello")]).await?;
//! assert_eq!(reply, "hello");
//!
//! ctx.shutdown().run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod invoker;
pub mod proxy;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ReferenceConfig;
pub use invoker::{ReferenceCache, ServiceInvoker};
pub use proxy::{Invocation, MethodDescriptor, PendingCall, ServiceProxy};
