//! Orbit Transport Layer
//!
//! Connection management between consumers and providers.
//!
//! # Architecture
//!
//! - **[`TransportClient`]**: one multiplexed connection to one provider; any
//!   number of requests may be in flight, matched to responses by request id
//! - **[`TransportServer`]**: a listening endpoint that decodes inbound frames
//!   and forwards requests to a [`MessageHandler`]
//! - **[`Transport`]**: factory for both, registered by name (`tcp`) in the
//!   extension registry
//!
//! Every endpoint moves through [`EndpointState`]: `Created -> Active -> Closed`.
//! `Closed` is terminal; a closed client is replaced, never reopened.
//!
//! # Wire Format
//!
//! See [`crate::codec`]. All implementations enforce `max_frame_size`
//! (100 MB by default) on inbound frames.

pub mod tcp;
pub mod tcp_server;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codec, MAX_FRAME_SIZE};
use crate::future::RpcFuture;
use crate::protocol::error::Result;
use crate::protocol::{Request, Response};
use crate::url::{keys, Url};

pub use tcp::{TcpClient, TcpTransport};
pub use tcp_server::TcpServer;

/// Default connect timeout (3 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default time a synchronous call waits for its response (5 seconds)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a client or server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointState {
    Created = 0,
    Active = 1,
    Closed = 2,
}

/// Lock-free holder for an [`EndpointState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(EndpointState::Created as u8))
    }

    pub fn get(&self) -> EndpointState {
        match self.0.load(Ordering::Acquire) {
            0 => EndpointState::Created,
            1 => EndpointState::Active,
            _ => EndpointState::Closed,
        }
    }

    /// Moves `Created -> Active`. Fails if the endpoint is not fresh.
    pub fn activate(&self) -> bool {
        self.0
            .compare_exchange(
                EndpointState::Created as u8,
                EndpointState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to `Closed`; returns the previous state.
    pub fn close(&self) -> EndpointState {
        match self.0.swap(EndpointState::Closed as u8, Ordering::AcqRel) {
            0 => EndpointState::Created,
            1 => EndpointState::Active,
            _ => EndpointState::Closed,
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side connection settings, read from the provider Url options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_url(url: &Url) -> Self {
        let defaults = Self::default();
        Self {
            connect_timeout: url
                .parameter_as::<u64>(keys::CONNECT_TIMEOUT)
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: url
                .parameter_as::<u64>(keys::TIMEOUT)
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            max_frame_size: defaults.max_frame_size,
        }
    }
}

/// Handles decoded inbound requests on the provider side.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Produces the response for `request`. Failures are reported inside the
    /// response, never as a transport error.
    async fn handle(&self, request: Request) -> Response;
}

/// One consumer-side connection to one provider.
#[async_trait]
pub trait TransportClient: Send + Sync {
    fn url(&self) -> &Url;

    /// Connects. Idempotent while active; fails once closed.
    async fn open(&self) -> Result<()>;

    /// Writes `request` and returns the future its response will complete.
    fn request(&self, request: Request) -> Result<RpcFuture>;

    /// Sends a health-check probe and waits up to `timeout` for the answer.
    async fn check_health(&self, timeout: Duration) -> Result<()>;

    fn is_active(&self) -> bool;

    fn state(&self) -> EndpointState;

    async fn close(&self);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// A provider-side listening endpoint.
#[async_trait]
pub trait TransportServer: Send + Sync {
    fn url(&self) -> &Url;

    /// Binds and starts accepting connections.
    async fn open(&self) -> Result<()>;

    fn is_active(&self) -> bool;

    fn state(&self) -> EndpointState;

    async fn close(&self);

    /// The bound address; differs from the Url when bound to port 0.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Factory for clients and servers of one transport kind.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn client(&self, url: &Url, codec: Codec) -> Result<Arc<dyn TransportClient>>;

    fn server(
        &self,
        url: &Url,
        codec: Codec,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn TransportServer>>;
}
