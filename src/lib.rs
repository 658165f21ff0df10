//! # Orbit
//!
//! Consumer/provider RPC over a versioned binary framing protocol.
//!
//! This crate re-exports the workspace members so applications can depend on
//! a single crate:
//!
//! - [`common`] - Url, protocol types, codecs, transport, registries, shutdown
//! - [`cluster`] - request senders, load balancers, fault tolerance, health checks
//! - [`consumer`] - reference configs, invokers and service proxies
//! - [`provider`] - services, routers and exposers

pub use orbit_cluster as cluster;
pub use orbit_common as common;
pub use orbit_consumer as consumer;
pub use orbit_provider as provider;

pub use orbit_common::{OrbitContext, OrbitError, Request, Response, Result, Url};
pub use orbit_consumer::{ReferenceCache, ReferenceConfig, ServiceProxy};
pub use orbit_provider::{Exposer, MethodTable, Service, ServiceConfig};
