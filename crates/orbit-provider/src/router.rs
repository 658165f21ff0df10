use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::protocol::{Request, Response};
use orbit_common::transport::MessageHandler;
use orbit_common::Url;

use crate::service::Service;

fn service_key(interface: &str, group: &str, version: &str) -> String {
    format!("{}:{}:{}", interface, group, version)
}

/// Address-scoped dispatch table from (interface, group, version) to a
/// service instance.
pub struct Router {
    address: String,
    services: DashMap<String, Arc<dyn Service>>,
}

impl Router {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            services: DashMap::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Maps the provider Url's interface, group and version to `service`.
    pub fn register(&self, provider: &Url, service: Arc<dyn Service>) -> Result<()> {
        let key = provider.service_key();
        match self.services.entry(key.clone()) {
            Entry::Occupied(_) => Err(OrbitError::Config(format!(
                "{} is already exported on {}",
                key, self.address
            ))),
            Entry::Vacant(slot) => {
                slot.insert(service);
                tracing::info!(service = %key, address = %self.address, "Service registered");
                Ok(())
            }
        }
    }

    /// Removes the mapping; returns whether it existed.
    pub fn unregister(&self, provider: &Url) -> bool {
        let removed = self.services.remove(&provider.service_key()).is_some();
        if removed {
            tracing::info!(service = %provider.service_key(), address = %self.address, "Service unregistered");
        }
        removed
    }

    pub fn contains(&self, provider: &Url) -> bool {
        self.services.contains_key(&provider.service_key())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn lookup(&self, request: &Request) -> Result<Arc<dyn Service>> {
        let key = service_key(&request.interface, request.group(), request.version());
        self.services
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrbitError::ServiceNotFound {
                interface: request.interface.clone(),
                group: request.group().to_string(),
                version: request.version().to_string(),
                address: self.address.clone(),
            })
    }
}

#[async_trait]
impl MessageHandler for Router {
    async fn handle(&self, request: Request) -> Response {
        let id = request.id;
        let service = match self.lookup(&request) {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(error = %e, "Unmatched dispatch target");
                return Response::framework_error(id, e.to_string());
            }
        };

        tracing::debug!(id, interface = %request.interface, method = %request.method, "Dispatching");
        let call = service.invoke(&request.method, &request.parameter_types, request.args);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Response::success(id, value),
            Ok(Err(exception)) => Response::failure(id, exception),
            Err(_) => {
                tracing::error!(id, interface = %request.interface, method = %request.method, "Service panicked");
                Response::framework_error(
                    id,
                    format!("{}.{} panicked", request.interface, request.method),
                )
            }
        }
    }
}
