use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::url::{keys, DEFAULT_GROUP, DEFAULT_VERSION};

pub type RequestId = u64;
pub type RpcArgs = Vec<serde_json::Value>;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A single remote invocation.
///
/// `parameter_types` is the canonical signature string: the declared
/// parameter type names joined by `,` (e.g. `"String,i32"`). Providers use it
/// to pick between overloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub interface: String,
    pub method: String,
    pub parameter_types: String,
    pub args: RpcArgs,
    /// Per-call options: group, version, timeout, retries.
    pub attachments: HashMap<String, String>,
    pub is_async: bool,
}

impl Request {
    pub fn new(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Request {
            id: generate_request_id(),
            interface: interface.into(),
            method: method.into(),
            parameter_types: String::new(),
            args: Vec::new(),
            attachments: HashMap::new(),
            is_async: false,
        }
    }

    pub fn with_args(mut self, args: RpcArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_parameter_types<S: AsRef<str>>(mut self, types: &[S]) -> Self {
        self.parameter_types = canonical_signature(types);
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn with_group(self, group: impl Into<String>) -> Self {
        self.with_attachment(keys::GROUP, group)
    }

    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.with_attachment(keys::VERSION, version)
    }

    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        self.with_attachment(keys::TIMEOUT, timeout_ms.to_string())
    }

    pub fn with_retries(self, retries: u32) -> Self {
        self.with_attachment(keys::RETRIES, retries.to_string())
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn group(&self) -> &str {
        self.attachments
            .get(keys::GROUP)
            .map(String::as_str)
            .unwrap_or(DEFAULT_GROUP)
    }

    pub fn version(&self) -> &str {
        self.attachments
            .get(keys::VERSION)
            .map(String::as_str)
            .unwrap_or(DEFAULT_VERSION)
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.attachments.get(keys::TIMEOUT).and_then(|v| v.parse().ok())
    }

    pub fn retries(&self) -> Option<u32> {
        self.attachments.get(keys::RETRIES).and_then(|v| v.parse().ok())
    }
}

/// Joins declared parameter type names into the canonical signature string.
pub fn canonical_signature<S: AsRef<str>>(types: &[S]) -> String {
    types
        .iter()
        .map(|t| t.as_ref().trim())
        .collect::<Vec<_>>()
        .join(",")
}

/// Allocates a request id: time-ordered in the upper 32 bits, a process-wide
/// counter in the lower 32 bits so concurrent callers never collide.
pub fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
