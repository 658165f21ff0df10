//! Orbit cluster layer.
//!
//! Turns a set of provider Urls into something a consumer can call:
//!
//! - [`sender`]: one [`RequestSender`] per provider, wrapping a transport client
//! - [`load_balancer`]: picks active senders (`random`, `roundrobin`)
//! - [`fault_tolerance`]: call policies over the balancer (`failfast`,
//!   `broadcast`, `failover`)
//! - [`directory`]: registry listener that keeps senders and balancer in sync
//!   with the notified provider set
//! - [`health_checker`]: periodic liveness probes
//!
//! Strategies are resolved by name through the extension registry; call
//! [`register_defaults`] once on a context to make the built-in ones available.

pub mod directory;
pub mod fault_tolerance;
pub mod health_checker;
pub mod load_balancer;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use orbit_common::extension::Scope;
use orbit_common::protocol::error::Result;
use orbit_common::OrbitContext;

pub use directory::ProviderDirectory;
pub use fault_tolerance::{Broadcast, FailFast, Failover, FaultTolerance};
pub use health_checker::{HealthCheckConfig, HealthChecker};
pub use load_balancer::{LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer};
pub use sender::{Reply, RequestSender};

pub const DEFAULT_LOAD_BALANCER: &str = load_balancer::RANDOM;
pub const DEFAULT_FAULT_TOLERANCE: &str = fault_tolerance::FAIL_FAST;

/// Registers the built-in load balancers and fault-tolerance strategies.
///
/// Both are prototype-scoped: each service reference gets its own instance,
/// since they hold per-interface state.
pub fn register_defaults(ctx: &OrbitContext) -> Result<()> {
    let extensions = ctx.extensions();

    extensions.register::<dyn LoadBalancer, _>(load_balancer::RANDOM, Scope::Prototype, || {
        Arc::new(RandomLoadBalancer::new())
    })?;
    extensions.register::<dyn LoadBalancer, _>(load_balancer::ROUND_ROBIN, Scope::Prototype, || {
        Arc::new(RoundRobinLoadBalancer::new())
    })?;

    extensions.register::<dyn FaultTolerance, _>(fault_tolerance::FAIL_FAST, Scope::Prototype, || {
        Arc::new(FailFast::new())
    })?;
    extensions.register::<dyn FaultTolerance, _>(fault_tolerance::BROADCAST, Scope::Prototype, || {
        Arc::new(Broadcast::new())
    })?;
    extensions.register::<dyn FaultTolerance, _>(fault_tolerance::FAILOVER, Scope::Prototype, || {
        Arc::new(Failover::new())
    })?;

    tracing::debug!("Registered cluster extensions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_common::OrbitError;

    #[test]
    fn test_register_defaults() {
        let ctx = OrbitContext::with_defaults().unwrap();
        register_defaults(&ctx).unwrap();

        assert_eq!(
            ctx.extensions().names::<dyn LoadBalancer>(),
            vec!["random", "roundrobin"]
        );
        assert_eq!(
            ctx.extensions().names::<dyn FaultTolerance>(),
            vec!["broadcast", "failfast", "failover"]
        );

        let lb = ctx.extensions().resolve::<dyn LoadBalancer>("roundrobin").unwrap();
        assert_eq!(lb.name(), "roundrobin");
    }

    #[test]
    fn test_strategies_are_prototypes() {
        let ctx = OrbitContext::with_defaults().unwrap();
        register_defaults(&ctx).unwrap();

        let a = ctx.extensions().resolve::<dyn FaultTolerance>("failfast").unwrap();
        let b = ctx.extensions().resolve::<dyn FaultTolerance>("failfast").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_register_twice_fails() {
        let ctx = OrbitContext::with_defaults().unwrap();
        register_defaults(&ctx).unwrap();
        assert!(matches!(
            register_defaults(&ctx),
            Err(OrbitError::DuplicateExtension { .. })
        ));
    }
}
