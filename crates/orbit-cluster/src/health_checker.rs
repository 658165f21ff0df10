use dashmap::DashMap;
use orbit_common::protocol::error::Result;
use orbit_common::url::keys;
use orbit_common::Url;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sender::RequestSender;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failures after which a provider is reported unhealthy.
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
        }
    }
}

impl HealthCheckConfig {
    /// Reads `health.interval` (ms) from `url`; `None` when the option is absent.
    pub fn from_url(url: &Url) -> Option<Self> {
        let interval = url.parameter_as::<u64>(keys::HEALTH_INTERVAL)?;
        Some(Self {
            interval: Duration::from_millis(interval.max(1)),
            ..Self::default()
        })
    }
}

struct Target {
    sender: Arc<RequestSender>,
    consecutive_failures: u32,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Skipped senders whose dropped connection was re-established.
    pub reconnected: usize,
}

/// Periodic liveness prober for watched senders.
///
/// Every tick it sends the health-check sentinel through each watched sender's
/// client. Senders that are uninitialized or inactive are skipped for that
/// tick; inactive ones get a reconnect attempt so the next tick can probe them
/// again. A failing provider is logged; it never aborts the sweep.
pub struct HealthChecker {
    config: HealthCheckConfig,
    targets: DashMap<String, Target>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Creates a new health checker.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            targets: DashMap::new(),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Adds `sender` to the sweep, replacing any sender with the same identity.
    pub fn watch(&self, sender: Arc<RequestSender>) {
        self.targets.insert(
            sender.url().identity(),
            Target {
                sender,
                consecutive_failures: 0,
            },
        );
    }

    pub fn unwatch(&self, url: &Url) {
        self.targets.remove(&url.identity());
    }

    pub fn watched(&self) -> usize {
        self.targets.len()
    }

    pub fn consecutive_failures(&self, url: &Url) -> u32 {
        self.targets
            .get(&url.identity())
            .map(|t| t.consecutive_failures)
            .unwrap_or(0)
    }

    /// Starts the periodic sweep on its own task. Calling it again while the
    /// task runs does nothing. The task keeps the checker alive until
    /// [`HealthChecker::stop`].
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let checker = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            checker.run().await;
        }));
        info!(interval_ms = self.config.interval.as_millis() as u64, "Health checker started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Health checker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Main health check loop
    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    /// Probes every watched sender once, in parallel.
    pub async fn sweep(&self) -> SweepReport {
        let senders: Vec<Arc<RequestSender>> = self
            .targets
            .iter()
            .map(|entry| Arc::clone(&entry.sender))
            .collect();

        let mut report = SweepReport::default();
        let mut dormant = Vec::new();
        let checks: Vec<_> = senders
            .into_iter()
            .filter(|sender| {
                let eligible = sender.is_initialized() && sender.is_active();
                if !eligible {
                    report.skipped += 1;
                    if sender.is_initialized() {
                        dormant.push(Arc::clone(sender));
                    }
                }
                eligible
            })
            .map(|sender| {
                let timeout = self.config.timeout;
                async move {
                    let result: Result<()> = sender.check_health(timeout).await;
                    (sender, result)
                }
            })
            .collect();

        let reconnects = dormant.iter().map(|sender| sender.reconnect());
        let (results, reconnected) = futures::future::join(
            futures::future::join_all(checks),
            futures::future::join_all(reconnects),
        )
        .await;
        report.reconnected = reconnected.into_iter().filter(|ok| *ok).count();

        for (sender, result) in results {
            report.checked += 1;
            let identity = sender.url().identity();
            match result {
                Ok(()) => {
                    if let Some(mut target) = self.targets.get_mut(&identity) {
                        if target.consecutive_failures > 0 {
                            info!(provider = %identity, "Provider recovered");
                        }
                        target.consecutive_failures = 0;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let failures = self
                        .targets
                        .get_mut(&identity)
                        .map(|mut t| {
                            t.consecutive_failures += 1;
                            t.consecutive_failures
                        })
                        .unwrap_or(1);
                    if failures >= self.config.failure_threshold {
                        warn!(provider = %identity, failures, error = %e, "Provider is unhealthy");
                    } else {
                        debug!(provider = %identity, failures, error = %e, "Health check failed");
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{senders, Behavior, StubClient};
    use orbit_common::transport::TransportClient;
    use serde_json::json;
    use tracing_test::traced_test;

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(50),
            failure_threshold: 2,
        }
    }

    #[test]
    fn test_health_check_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn test_config_from_url() {
        let url = Url::parse("orbit://h:1/demo.Echo?health.interval=250").unwrap();
        let config = HealthCheckConfig::from_url(&url).unwrap();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert!(HealthCheckConfig::from_url(&Url::parse("orbit://h:1/demo.Echo").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_sweep_skips_inactive_and_uninitialized() {
        let (senders, clients) = senders(&[Behavior::Reply(json!(1)), Behavior::Reply(json!(2))]).await;
        clients[1].set_active(false);

        let fresh_client = Arc::new(StubClient::new(9, Behavior::Reply(json!(3))));
        let fresh = Arc::new(RequestSender::new(fresh_client.url().clone(), fresh_client.clone()));

        let checker = HealthChecker::new(config());
        for sender in senders.iter().chain(std::iter::once(&fresh)) {
            checker.watch(Arc::clone(sender));
        }

        clients[1].set_reachable(false);

        let report = checker.sweep().await;
        assert_eq!(
            report,
            SweepReport { checked: 1, skipped: 2, failed: 0, reconnected: 0 }
        );
        assert_eq!(clients[0].health_checks(), 1);
        assert_eq!(clients[1].health_checks(), 0);
        assert_eq!(fresh_client.health_checks(), 0);
        assert_eq!(fresh_client.opens(), 0, "uninitialized senders are left alone");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sweep_reconnects_dropped_sender() {
        let (senders, clients) = senders(&[Behavior::Reply(json!(1)), Behavior::Reply(json!(2))]).await;
        clients[1].set_active(false);

        let checker = HealthChecker::new(config());
        for sender in &senders {
            checker.watch(Arc::clone(sender));
        }

        let report = checker.sweep().await;
        assert_eq!(
            report,
            SweepReport { checked: 1, skipped: 1, failed: 0, reconnected: 1 }
        );
        assert_eq!(clients[1].health_checks(), 0, "not probed on the tick it was down");
        assert!(senders[1].is_active());
        assert!(logs_contain("Sender reconnected"));

        let report = checker.sweep().await;
        assert_eq!(report.checked, 2);
        assert_eq!(clients[1].health_checks(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failures_are_logged_and_do_not_abort() {
        let (senders, clients) = senders(&[
            Behavior::Reply(json!(1)),
            Behavior::Reply(json!(2)),
            Behavior::Reply(json!(3)),
        ])
        .await;
        clients[0].set_healthy(false);

        let checker = HealthChecker::new(config());
        for sender in &senders {
            checker.watch(Arc::clone(sender));
        }

        let report = checker.sweep().await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.failed, 1);
        assert!(clients.iter().all(|c| c.health_checks() == 1));
        assert_eq!(checker.consecutive_failures(senders[0].url()), 1);

        checker.sweep().await;
        assert_eq!(checker.consecutive_failures(senders[0].url()), 2);
        assert!(logs_contain("Provider is unhealthy"));

        clients[0].set_healthy(true);
        checker.sweep().await;
        assert_eq!(checker.consecutive_failures(senders[0].url()), 0);
        assert!(logs_contain("Provider recovered"));
    }

    #[tokio::test]
    async fn test_periodic_task_probes_until_stopped() {
        let (senders, clients) = senders(&[Behavior::Reply(json!(1))]).await;
        let checker = Arc::new(HealthChecker::new(config()));
        checker.watch(Arc::clone(&senders[0]));

        checker.start();
        checker.start();
        assert!(checker.is_running());
        tokio::time::sleep(Duration::from_millis(110)).await;
        checker.stop();
        assert!(!checker.is_running());

        let probes = clients[0].health_checks();
        assert!(probes >= 2, "only {probes} probes");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(clients[0].health_checks(), probes);
    }

    #[tokio::test]
    async fn test_unwatch_removes_target() {
        let (senders, clients) = senders(&[Behavior::Reply(json!(1))]).await;
        let checker = HealthChecker::new(config());
        checker.watch(Arc::clone(&senders[0]));
        checker.unwatch(senders[0].url());
        assert_eq!(checker.watched(), 0);

        checker.sweep().await;
        assert_eq!(clients[0].health_checks(), 0);
    }
}
