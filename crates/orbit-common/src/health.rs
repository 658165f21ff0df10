//! Health-check sentinel.
//!
//! A probe is an ordinary request addressed to a reserved interface/method
//! pair, so it travels through any codec unchanged. Providers wrap their
//! dispatch handler in [`HealthCheckHandler`], which answers probes directly.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::protocol::{Request, Response};
use crate::transport::MessageHandler;

pub const HEALTH_CHECK_INTERFACE: &str = "$orbit.health";
pub const HEALTH_CHECK_METHOD: &str = "ping";

/// Builds a fresh probe request.
pub fn create_request() -> Request {
    Request::new(HEALTH_CHECK_INTERFACE, HEALTH_CHECK_METHOD)
}

pub fn is_health_request(request: &Request) -> bool {
    request.interface == HEALTH_CHECK_INTERFACE && request.method == HEALTH_CHECK_METHOD
}

/// The canned answer to a probe.
pub fn create_response(request: &Request) -> Response {
    Response::success(request.id, json!("pong"))
}

/// Answers probes itself and forwards everything else to `inner`.
pub struct HealthCheckHandler<H: ?Sized> {
    inner: Arc<H>,
}

impl<H: ?Sized> HealthCheckHandler<H> {
    pub fn new(inner: Arc<H>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<H> {
        &self.inner
    }
}

#[async_trait]
impl<H> MessageHandler for HealthCheckHandler<H>
where
    H: MessageHandler + ?Sized,
{
    async fn handle(&self, request: Request) -> Response {
        if is_health_request(&request) {
            return create_response(&request);
        }
        self.inner.handle(request).await
    }
}
