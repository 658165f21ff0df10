//! Ordered process-exit cleanup.
//!
//! Components register a hook with a priority; [`ShutdownHooks::run`] invokes
//! every hook in ascending priority order exactly once. A failing or panicking
//! hook is logged and does not stop the rest.

use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::protocol::error::Result;

/// Consumers release their provider connections first.
pub const CONSUMER_PRIORITY: i32 = 100;
/// Providers stop listening after consumers are gone.
pub const PROVIDER_PRIORITY: i32 = 200;
/// Registries and other shared infrastructure go last.
pub const REGISTRY_PRIORITY: i32 = 300;

type HookFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type HookFn = Box<dyn FnOnce() -> HookFuture + Send>;

struct Hook {
    priority: i32,
    seq: u64,
    name: String,
    run: HookFn,
}

#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<Hook>>,
    next_seq: AtomicU64,
    ran: AtomicBool,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook. Hooks with equal priority run in registration order.
    pub fn register<F, Fut>(&self, name: impl Into<String>, priority: i32, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.ran.load(Ordering::Acquire) {
            tracing::warn!(hook = %name, "Shutdown already ran, hook will never be invoked");
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().push(Hook {
            priority,
            seq,
            name,
            run: Box::new(move || Box::pin(hook()) as HookFuture),
        });
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::Acquire)
    }

    /// Runs every registered hook once, one after another. Later calls are
    /// no-ops.
    ///
    /// Each hook runs on its own task so a panic stays contained. Returns the
    /// number of hooks that failed or panicked.
    pub async fn run(&self) -> usize {
        if self.ran.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut hooks = std::mem::take(&mut *self.hooks.lock());
        hooks.sort_by_key(|h| (h.priority, h.seq));

        tracing::info!(count = hooks.len(), "Running shutdown hooks");
        let mut failures = 0;
        for hook in hooks {
            let Hook {
                priority, name, run, ..
            } = hook;
            let outcome = match catch_unwind(AssertUnwindSafe(run)) {
                Ok(future) => tokio::spawn(future).await.map_err(|e| e.is_panic()),
                Err(_) => Err(true),
            };
            match outcome {
                Ok(Ok(())) => tracing::debug!(hook = %name, priority, "Shutdown hook completed"),
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(hook = %name, priority, error = %e, "Shutdown hook failed");
                }
                Err(true) => {
                    failures += 1;
                    tracing::error!(hook = %name, priority, "Shutdown hook panicked");
                }
                Err(false) => {
                    failures += 1;
                    tracing::error!(hook = %name, priority, "Shutdown hook was cancelled");
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for ShutdownHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHooks")
            .field("pending", &self.len())
            .field("ran", &self.has_run())
            .finish()
    }
}
