//! Orbit provider side.
//!
//! Services implement [`Service`] (or are assembled from closures with a
//! [`MethodTable`]) and are exported through an [`Exposer`]. All services
//! exposed on one address share a single server whose [`Router`] dispatches
//! by interface, group and version.
//!
//! ```no_run
//! # async fn demo() -> orbit_common::Result<()> {
//! use orbit_common::OrbitContext;
//! use orbit_provider::service::arg;
//! use orbit_provider::{Exposer, MethodTable, ServiceConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let ctx = OrbitContext::with_defaults()?;
//! let exposer = Exposer::new(ctx.clone(), None);
//!
//! let echo = MethodTable::new().sync_method("echo", &["String"], |args| {
//!     let text: String = arg(&args, 0)?;
//!     Ok(json!(text))
//! });
//! let url = ServiceConfig::new("demo.Echo").bind("0.0.0.0", 20880).to_url();
//! exposer.expose(&url, Arc::new(echo)).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! ctx.shutdown().run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod exposer;
pub mod router;
pub mod service;

pub use config::ServiceConfig;
pub use exposer::Exposer;
pub use router::Router;
pub use service::{MethodTable, Service};
