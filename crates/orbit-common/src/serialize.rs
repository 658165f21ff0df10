//! Serializer extension point.
//!
//! A serializer turns protocol messages and argument values into bytes. Each
//! one advertises a small id (0..=31) that the framed codec packs into its
//! header so the peer can pick the matching serializer without negotiation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::error::{OrbitError, RemoteException, Result};
use crate::protocol::{Request, RequestId, Response};

/// Largest serializer id that fits in the framed header.
pub const MAX_SERIALIZER_ID: u8 = 31;

pub const JSON_SERIALIZER_ID: u8 = 1;
pub const POSTCARD_SERIALIZER_ID: u8 = 2;

pub trait Serializer: Send + Sync {
    /// Header-level id, in `0..=MAX_SERIALIZER_ID`.
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>>;

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request>;

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>>;

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response>;

    fn serialize_value(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn deserialize_value(&self, bytes: &[u8]) -> Result<serde_json::Value>;

    fn serialize_values(&self, values: &[serde_json::Value]) -> Result<Vec<u8>>;

    fn deserialize_values(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>>;
}

/// Plain JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn id(&self) -> u8 {
        JSON_SERIALIZER_ID
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn serialize_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn serialize_values(&self, values: &[serde_json::Value]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(values)?)
    }

    fn deserialize_values(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary envelope via `postcard`.
///
/// postcard is not self-describing, so dynamically typed values (arguments,
/// results) travel inside the envelope as JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostcardSerializer;

#[derive(Serialize, Deserialize)]
struct RequestEnvelope {
    id: RequestId,
    interface: String,
    method: String,
    parameter_types: String,
    args: Vec<String>,
    attachments: HashMap<String, String>,
    is_async: bool,
}

#[derive(Serialize, Deserialize)]
struct ResponseEnvelope {
    id: RequestId,
    result: Option<String>,
    exception: Option<RemoteException>,
    version: u8,
    sent_at_ms: u64,
    received_at_ms: u64,
}

impl Serializer for PostcardSerializer {
    fn id(&self) -> u8 {
        POSTCARD_SERIALIZER_ID
    }

    fn name(&self) -> &'static str {
        "postcard"
    }

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>> {
        let envelope = RequestEnvelope {
            id: request.id,
            interface: request.interface.clone(),
            method: request.method.clone(),
            parameter_types: request.parameter_types.clone(),
            args: request
                .args
                .iter()
                .map(serde_json::to_string)
                .collect::<std::result::Result<_, _>>()?,
            attachments: request.attachments.clone(),
            is_async: request.is_async,
        };
        Ok(postcard::to_stdvec(&envelope)?)
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request> {
        let envelope: RequestEnvelope = postcard::from_bytes(bytes)?;
        Ok(Request {
            id: envelope.id,
            interface: envelope.interface,
            method: envelope.method,
            parameter_types: envelope.parameter_types,
            args: envelope
                .args
                .iter()
                .map(|a| serde_json::from_str(a))
                .collect::<std::result::Result<_, _>>()?,
            attachments: envelope.attachments,
            is_async: envelope.is_async,
        })
    }

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>> {
        let envelope = ResponseEnvelope {
            id: response.id,
            result: response
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            exception: response.exception.clone(),
            version: response.version,
            sent_at_ms: response.sent_at_ms,
            received_at_ms: response.received_at_ms,
        };
        Ok(postcard::to_stdvec(&envelope)?)
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response> {
        let envelope: ResponseEnvelope = postcard::from_bytes(bytes)?;
        Ok(Response {
            id: envelope.id,
            result: envelope
                .result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            exception: envelope.exception,
            version: envelope.version,
            sent_at_ms: envelope.sent_at_ms,
            received_at_ms: envelope.received_at_ms,
        })
    }

    fn serialize_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(&serde_json::to_string(value)?)?)
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        let text: String = postcard::from_bytes(bytes)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn serialize_values(&self, values: &[serde_json::Value]) -> Result<Vec<u8>> {
        let texts = values
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(postcard::to_stdvec(&texts)?)
    }

    fn deserialize_values(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>> {
        let texts: Vec<String> = postcard::from_bytes(bytes)?;
        texts
            .iter()
            .map(|t| serde_json::from_str(t).map_err(OrbitError::from))
            .collect()
    }
}
