//! Orbit Response Types
//!
//! This module defines the RPC response structure.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::error::{OrbitError, RemoteException, Result};
use super::{RequestId, PROTOCOL_VERSION};

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// An RPC response returned from a provider to the consumer.
///
/// # Response Flow
///
/// 1. Provider receives and dispatches a `Request`
/// 2. Provider creates a `Response` (result or captured exception)
/// 3. Response is encoded by the connection's codec and framed
/// 4. Consumer decodes it and completes the pending future for `id`
///
/// `result` and `exception` are mutually exclusive; the constructors are the
/// only way this crate builds responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<RpcResult>,
    /// Captured exception (present on failure)
    pub exception: Option<RemoteException>,
    /// Protocol version of the provider that produced it
    pub version: u8,
    /// Milliseconds since the epoch when the provider sent the response
    #[serde(default)]
    pub sent_at_ms: u64,
    /// Milliseconds since the epoch when the consumer decoded the response
    #[serde(default)]
    pub received_at_ms: u64,
}

impl Response {
    /// Creates a successful response.
    ///
    /// # Example
    ///
    /// ```
    /// use orbit_common::protocol::Response;
    /// use serde_json::json;
    ///
    /// let response = Response::success(123, json!({"pi": 3.14159}));
    /// assert!(response.is_success());
    /// ```
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            exception: None,
            version: PROTOCOL_VERSION,
            sent_at_ms: 0,
            received_at_ms: 0,
        }
    }

    /// Creates a response carrying a captured exception.
    pub fn failure(id: RequestId, exception: RemoteException) -> Self {
        Response {
            id,
            result: None,
            exception: Some(exception),
            version: PROTOCOL_VERSION,
            sent_at_ms: 0,
            received_at_ms: 0,
        }
    }

    /// Creates a framework-error response, used when dispatch or encoding
    /// fails on the provider.
    pub fn framework_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::failure(id, RemoteException::framework(message))
    }

    pub fn is_success(&self) -> bool {
        self.exception.is_none()
    }

    pub fn mark_sent(&mut self) {
        self.sent_at_ms = now_millis();
    }

    pub fn mark_received(&mut self) {
        self.received_at_ms = now_millis();
    }

    /// Turns the response into the caller-facing result: business exceptions
    /// surface as [`OrbitError::Business`], provider framework errors as
    /// [`OrbitError::RemoteFramework`].
    pub fn into_result(self) -> Result<RpcResult> {
        match self.exception {
            Some(exception) if exception.is_business() => Err(OrbitError::Business(exception)),
            Some(exception) => Err(OrbitError::RemoteFramework(exception.message)),
            None => Ok(self.result.unwrap_or(RpcResult::Null)),
        }
    }

    /// Keeps a successful response intact and converts a failed one the same
    /// way [`Response::into_result`] does.
    pub fn check(self) -> Result<Self> {
        match self.exception {
            None => Ok(self),
            Some(exception) if exception.is_business() => Err(OrbitError::Business(exception)),
            Some(exception) => Err(OrbitError::RemoteFramework(exception.message)),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
