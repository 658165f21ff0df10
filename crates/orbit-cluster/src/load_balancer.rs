use arc_swap::ArcSwap;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use orbit_common::protocol::Request;

use crate::sender::RequestSender;

pub const RANDOM: &str = "random";
pub const ROUND_ROBIN: &str = "roundrobin";

/// Picks active senders for one interface.
///
/// The sender list is replaced wholesale by [`LoadBalancer::refresh`]; readers
/// always see either the old or the new list, never a partial one.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replaces the current sender list.
    fn refresh(&self, senders: Vec<Arc<RequestSender>>);

    /// One active sender, or `None` when no sender is active.
    fn select_one(&self, request: &Request) -> Option<Arc<RequestSender>>;

    /// Every active sender, in the strategy's rotation order.
    fn select_all(&self, request: &Request) -> Vec<Arc<RequestSender>>;

    /// Snapshot of the full list, active or not.
    fn senders(&self) -> Vec<Arc<RequestSender>>;

    /// Drops the list and destroys every sender on it.
    async fn destroy(&self) {
        let senders = self.senders();
        self.refresh(Vec::new());
        for sender in senders {
            sender.destroy().await;
        }
    }
}

/// Scans `senders` starting at `start` with wraparound, yielding active ones.
fn active_from(
    senders: &[Arc<RequestSender>],
    start: usize,
) -> impl Iterator<Item = &Arc<RequestSender>> {
    let len = senders.len();
    (0..len)
        .map(move |offset| &senders[(start + offset) % len])
        .filter(|sender| sender.is_active())
}

/// Random load balancer: uniformly random starting point, first active
/// sender from there on.
#[derive(Default)]
pub struct RandomLoadBalancer {
    senders: ArcSwap<Vec<Arc<RequestSender>>>,
}

impl RandomLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

#[async_trait]
impl LoadBalancer for RandomLoadBalancer {
    fn name(&self) -> &'static str {
        RANDOM
    }

    fn refresh(&self, senders: Vec<Arc<RequestSender>>) {
        tracing::debug!(count = senders.len(), "Refreshing random load balancer");
        self.senders.store(Arc::new(senders));
    }

    fn select_one(&self, _request: &Request) -> Option<Arc<RequestSender>> {
        let senders = self.senders.load();
        if senders.is_empty() {
            return None;
        }
        let picked = active_from(&senders, Self::start(senders.len())).next().cloned();
        picked
    }

    fn select_all(&self, _request: &Request) -> Vec<Arc<RequestSender>> {
        let senders = self.senders.load();
        if senders.is_empty() {
            return Vec::new();
        }
        let picked = active_from(&senders, Self::start(senders.len()))
            .cloned()
            .collect();
        picked
    }

    fn senders(&self) -> Vec<Arc<RequestSender>> {
        Vec::clone(&self.senders.load())
    }
}

/// Round-robin load balancer: each selection starts one past the last.
#[derive(Default)]
pub struct RoundRobinLoadBalancer {
    senders: ArcSwap<Vec<Arc<RequestSender>>>,
    next: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % len
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        ROUND_ROBIN
    }

    fn refresh(&self, senders: Vec<Arc<RequestSender>>) {
        tracing::debug!(count = senders.len(), "Refreshing round-robin load balancer");
        self.senders.store(Arc::new(senders));
    }

    fn select_one(&self, _request: &Request) -> Option<Arc<RequestSender>> {
        let senders = self.senders.load();
        if senders.is_empty() {
            return None;
        }
        let picked = active_from(&senders, self.start(senders.len())).next().cloned();
        picked
    }

    fn select_all(&self, _request: &Request) -> Vec<Arc<RequestSender>> {
        let senders = self.senders.load();
        if senders.is_empty() {
            return Vec::new();
        }
        let picked = active_from(&senders, self.start(senders.len()))
            .cloned()
            .collect();
        picked
    }

    fn senders(&self) -> Vec<Arc<RequestSender>> {
        Vec::clone(&self.senders.load())
    }
}
