//! In-process stand-ins for transport clients.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::protocol::{RemoteException, Request, Response};
use orbit_common::transport::{EndpointState, TransportClient};
use orbit_common::{RpcFuture, Url};

use crate::sender::RequestSender;

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(Value),
    Business,
    Transport,
    Timeout,
    /// Leaves every future pending until the test completes it.
    Manual,
}

pub struct StubClient {
    url: Url,
    behavior: Mutex<Behavior>,
    active: AtomicBool,
    healthy: AtomicBool,
    reachable: AtomicBool,
    calls: AtomicUsize,
    opens: AtomicUsize,
    health_checks: AtomicUsize,
    pending: Mutex<Vec<RpcFuture>>,
}

impl StubClient {
    pub fn new(index: u16, behavior: Behavior) -> Self {
        Self {
            url: Url::parse(&format!("orbit://127.0.0.1:{}/demo.Echo", 20000 + index))
                .expect("stub url"),
            behavior: Mutex::new(behavior),
            active: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// While unreachable, `open` fails the way a refused connect does.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> Vec<RpcFuture> {
        self.pending.lock().clone()
    }

    pub fn complete_all(&self, value: Value) {
        for future in self.pending.lock().drain(..) {
            future.complete(Response::success(future.id(), value.clone()));
        }
    }
}

#[async_trait]
impl TransportClient for StubClient {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(OrbitError::Connection(format!(
                "Failed to connect to {}: connection refused",
                self.url.address()
            )));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn request(&self, request: Request) -> Result<RpcFuture> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = request.id;
        let future = match self.behavior.lock().clone() {
            Behavior::Reply(value) => RpcFuture::ready(id, Ok(Response::success(id, value))),
            Behavior::Business => RpcFuture::ready(
                id,
                Ok(Response::failure(id, RemoteException::business("IllegalState", "rejected"))),
            ),
            Behavior::Transport => {
                RpcFuture::ready(id, Err(OrbitError::Transport("connection reset".into())))
            }
            Behavior::Timeout => RpcFuture::ready(id, Err(OrbitError::Timeout(1))),
            Behavior::Manual => {
                let future = RpcFuture::new(id);
                self.pending.lock().push(future.clone());
                future
            }
        };
        Ok(future)
    }

    async fn check_health(&self, _timeout: Duration) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrbitError::Timeout(1))
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn state(&self) -> EndpointState {
        if self.is_active() {
            EndpointState::Active
        } else {
            EndpointState::Created
        }
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Builds and initialises one sender per behavior.
pub async fn senders(behaviors: &[Behavior]) -> (Vec<Arc<RequestSender>>, Vec<Arc<StubClient>>) {
    let mut senders = Vec::new();
    let mut clients = Vec::new();
    for (i, behavior) in behaviors.iter().enumerate() {
        let client = Arc::new(StubClient::new(i as u16, behavior.clone()));
        let sender = Arc::new(RequestSender::new(client.url().clone(), client.clone()));
        sender.init().await.expect("stub init");
        senders.push(sender);
        clients.push(client);
    }
    (senders, clients)
}
