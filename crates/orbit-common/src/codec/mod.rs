//! Payload codecs.
//!
//! Two wire formats coexist and are told apart by the first two bytes:
//!
//! - **legacy**: `[LEGACY_PAYLOAD_MAGIC 2B][serializer id 1B][body]`, wrapped by
//!   the framer in a fixed transport header.
//! - **framed**: carries its own 16-byte header (see [`frame`]) and is written
//!   to the wire unmodified.
//!
//! A provider always answers with the codec kind and serializer the request
//! arrived with, so old and new consumers can share one listening port.

pub mod frame;

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::error::{OrbitError, Result};
use crate::protocol::{Message, MessageType, RequestId, Response, PROTOCOL_VERSION};
use crate::serialize::{JsonSerializer, PostcardSerializer, Serializer, MAX_SERIALIZER_ID};

pub use frame::{
    frame_within, length_field, map_io_error, peek_magic, read_frame, unframe, write_frame, Frame,
    FRAMED_MAGIC, HEADER_LEN, LEGACY_PAYLOAD_MAGIC, MAX_FRAME_SIZE, TRANSPORT_MAGIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Legacy,
    Framed,
}

impl CodecKind {
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Legacy => "legacy",
            CodecKind::Framed => "framed",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "legacy" => Ok(CodecKind::Legacy),
            "framed" => Ok(CodecKind::Framed),
            other => Err(OrbitError::Config(format!("unknown codec '{}'", other))),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded message together with the format it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: Message,
    pub kind: CodecKind,
    pub serializer_id: u8,
}

/// Encodes outgoing messages with one serializer and decodes incoming ones
/// with whichever known serializer the sender picked.
#[derive(Clone)]
pub struct Codec {
    kind: CodecKind,
    serializer: Arc<dyn Serializer>,
    known: Arc<HashMap<u8, Arc<dyn Serializer>>>,
    max_frame_size: usize,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("kind", &self.kind)
            .field("serializer", &self.serializer.name())
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl Codec {
    /// Builds a codec that also understands the built-in serializers.
    pub fn new(kind: CodecKind, serializer: Arc<dyn Serializer>) -> Self {
        let builtins: [Arc<dyn Serializer>; 2] =
            [Arc::new(JsonSerializer), Arc::new(PostcardSerializer)];
        Self::with_serializers(kind, serializer, builtins)
    }

    pub fn with_serializers<I>(kind: CodecKind, serializer: Arc<dyn Serializer>, known: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Serializer>>,
    {
        let mut map: HashMap<u8, Arc<dyn Serializer>> =
            known.into_iter().map(|s| (s.id(), s)).collect();
        map.insert(serializer.id(), Arc::clone(&serializer));
        Self {
            kind,
            serializer,
            known: Arc::new(map),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Caps the body size this codec will encode.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// The codec to answer a decoded message with: same kind, same serializer.
    pub fn for_reply(&self, decoded: &Decoded) -> Result<Codec> {
        let serializer = self.lookup(decoded.serializer_id)?;
        Ok(self.answering(decoded.kind, serializer))
    }

    fn answering(&self, kind: CodecKind, serializer: Arc<dyn Serializer>) -> Codec {
        Codec {
            kind,
            serializer,
            known: Arc::clone(&self.known),
            max_frame_size: self.max_frame_size,
        }
    }

    /// Builds the framework-error reply to a request frame whose body could
    /// not be decoded.
    ///
    /// The reply carries the id from the frame header and uses the frame's
    /// format, with the request's serializer when it is known and this codec's
    /// otherwise. Returns `None` when the header itself is unusable or the
    /// frame is not a request.
    pub fn reject(&self, bytes: Bytes, error: &OrbitError) -> Option<(RequestId, Bytes)> {
        let frame = frame::unframe(bytes).ok()?;
        if frame.message_type != MessageType::Request {
            return None;
        }
        let (kind, serializer_id) = match frame.magic {
            TRANSPORT_MAGIC => (CodecKind::Legacy, frame.payload.get(2).copied()),
            _ => (
                CodecKind::Framed,
                frame.payload.get(3).map(|b| b & MAX_SERIALIZER_ID),
            ),
        };
        let serializer = serializer_id
            .and_then(|id| self.lookup(id).ok())
            .unwrap_or_else(|| Arc::clone(&self.serializer));

        let response =
            Response::framework_error(frame.request_id, format!("failed to decode request: {}", error));
        let bytes = self
            .answering(kind, serializer)
            .encode(&Message::Response(response))
            .ok()?;
        Some((frame.request_id, bytes))
    }

    /// Encodes the payload only, without the transport header.
    pub fn encode_payload(&self, message: &Message) -> Result<Bytes> {
        let id = self.serializer.id();
        if id > MAX_SERIALIZER_ID {
            return Err(OrbitError::Codec(format!(
                "serializer id {} exceeds {}",
                id, MAX_SERIALIZER_ID
            )));
        }

        let body = match message {
            Message::Request(request) => self.serializer.serialize_request(request)?,
            Message::Response(response) => self.serializer.serialize_response(response)?,
        };

        match self.kind {
            CodecKind::Legacy => {
                let mut buf = BytesMut::with_capacity(3 + body.len());
                buf.put_u16(LEGACY_PAYLOAD_MAGIC);
                buf.put_u8(id);
                buf.put_slice(&body);
                Ok(buf.freeze())
            }
            CodecKind::Framed => {
                let version = match message {
                    Message::Response(response) => response.version,
                    Message::Request(_) => PROTOCOL_VERSION,
                };
                let len = length_field(body.len(), self.max_frame_size)?;
                let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
                buf.put_u16(FRAMED_MAGIC);
                buf.put_u8(version);
                buf.put_u8((message.message_type() as u8) << 5 | id);
                buf.put_u64(message.id());
                buf.put_u32(len);
                buf.put_slice(&body);
                Ok(buf.freeze())
            }
        }
    }

    /// Encodes and frames a message, ready for the wire.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let payload = self.encode_payload(message)?;
        frame::frame_within(payload, message.message_type(), message.id(), self.max_frame_size)
    }

    /// Encodes a response, falling back to a framework-error response for the
    /// same id and version when the original cannot be serialized.
    pub fn encode_response(&self, response: Response) -> Result<Bytes> {
        match self.encode(&Message::Response(response.clone())) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!(
                    request_id = response.id,
                    error = %e,
                    "Failed to encode response, sending framework error instead"
                );
                let mut fallback =
                    Response::framework_error(response.id, format!("failed to encode response: {}", e));
                fallback.version = response.version;
                fallback.sent_at_ms = response.sent_at_ms;
                self.encode(&Message::Response(fallback))
            }
        }
    }

    /// Decodes one complete frame as produced by [`read_frame`].
    pub fn decode(&self, bytes: Bytes) -> Result<Decoded> {
        let frame = frame::unframe(bytes)?;
        match frame.magic {
            TRANSPORT_MAGIC => self.decode_legacy(frame),
            _ => self.decode_framed(frame),
        }
    }

    fn decode_legacy(&self, frame: Frame) -> Result<Decoded> {
        let payload = frame.payload;
        let magic = peek_magic(&payload)?;
        if magic != LEGACY_PAYLOAD_MAGIC {
            return Err(OrbitError::InvalidMagic(magic));
        }
        if payload.len() < 3 {
            return Err(OrbitError::Codec("truncated legacy payload".to_string()));
        }
        let serializer_id = payload[2];
        let message = self.decode_body(frame.message_type, serializer_id, &payload[3..])?;
        Ok(Decoded {
            message,
            kind: CodecKind::Legacy,
            serializer_id,
        })
    }

    fn decode_framed(&self, frame: Frame) -> Result<Decoded> {
        let serializer_id = frame.payload[3] & MAX_SERIALIZER_ID;
        let message =
            self.decode_body(frame.message_type, serializer_id, &frame.payload[HEADER_LEN..])?;
        Ok(Decoded {
            message,
            kind: CodecKind::Framed,
            serializer_id,
        })
    }

    fn decode_body(&self, message_type: MessageType, serializer_id: u8, body: &[u8]) -> Result<Message> {
        let serializer = self.lookup(serializer_id)?;
        match message_type {
            MessageType::Request => Ok(Message::Request(serializer.deserialize_request(body)?)),
            MessageType::Response => Ok(Message::Response(serializer.deserialize_response(body)?)),
            MessageType::Other => Err(OrbitError::Codec("unsupported message type".to_string())),
        }
    }

    fn lookup(&self, serializer_id: u8) -> Result<Arc<dyn Serializer>> {
        self.known
            .get(&serializer_id)
            .cloned()
            .ok_or_else(|| OrbitError::Codec(format!("unknown serializer id {}", serializer_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RemoteException, Request, RequestId};
    use crate::serialize::POSTCARD_SERIALIZER_ID;
    use serde_json::json;

    fn codecs() -> Vec<Codec> {
        let mut all = Vec::new();
        for kind in [CodecKind::Legacy, CodecKind::Framed] {
            all.push(Codec::new(kind, Arc::new(JsonSerializer)));
            all.push(Codec::new(kind, Arc::new(PostcardSerializer)));
        }
        all
    }

    fn sample_request() -> Request {
        Request::new("demo.Echo", "echo")
            .with_parameter_types(&["String"])
            .with_args(vec![json!("hello")])
    }

    #[test]
    fn test_each_codec_decodes_its_own_output() {
        let request = sample_request();
        for codec in codecs() {
            let bytes = codec.encode(&Message::Request(request.clone())).unwrap();
            let decoded = codec.decode(bytes).unwrap();
            assert_eq!(decoded.kind, codec.kind());
            assert_eq!(decoded.serializer_id, codec.serializer().id());
            assert_eq!(decoded.message, Message::Request(request.clone()));
        }
    }

    #[test]
    fn test_any_codec_decodes_any_format() {
        let legacy = Codec::new(CodecKind::Legacy, Arc::new(JsonSerializer));
        let framed = Codec::new(CodecKind::Framed, Arc::new(PostcardSerializer));

        let response = Response::success(5, json!([1, 2, 3]));
        let bytes = framed.encode(&Message::Response(response.clone())).unwrap();
        let decoded = legacy.decode(bytes).unwrap();
        assert_eq!(decoded.kind, CodecKind::Framed);
        assert_eq!(decoded.serializer_id, POSTCARD_SERIALIZER_ID);
        assert_eq!(decoded.message, Message::Response(response));
    }

    #[test]
    fn test_reply_uses_request_format() {
        let server = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer));
        let client = Codec::new(CodecKind::Legacy, Arc::new(PostcardSerializer));

        let bytes = client.encode(&Message::Request(sample_request())).unwrap();
        let decoded = server.decode(bytes).unwrap();
        let reply = server.for_reply(&decoded).unwrap();
        assert_eq!(reply.kind(), CodecKind::Legacy);
        assert_eq!(reply.serializer().id(), POSTCARD_SERIALIZER_ID);

        let response_bytes = reply.encode_response(Response::success(decoded.message.id(), json!("ok"))).unwrap();
        assert_eq!(peek_magic(&response_bytes).unwrap(), TRANSPORT_MAGIC);
    }

    #[test]
    fn test_framed_header_layout() {
        let codec = Codec::new(CodecKind::Framed, Arc::new(PostcardSerializer));
        let mut response = Response::success(0x0102030405060708, json!(true));
        response.version = 3;
        let bytes = codec.encode(&Message::Response(response)).unwrap();

        assert_eq!(peek_magic(&bytes).unwrap(), FRAMED_MAGIC);
        assert_eq!(bytes[2], 3);
        assert_eq!(bytes[3] >> 5, MessageType::Response as u8);
        assert_eq!(bytes[3] & 0x1f, POSTCARD_SERIALIZER_ID);
        assert_eq!(&bytes[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_unknown_magic_is_rejected() {
        let codec = Codec::new(CodecKind::Legacy, Arc::new(JsonSerializer));
        let mut bytes = vec![0u8; 32];
        bytes[0] = 0xca;
        bytes[1] = 0xfe;
        let err = codec.decode(Bytes::from(bytes)).unwrap_err();
        assert!(matches!(err, OrbitError::InvalidMagic(0xcafe)));
    }

    #[test]
    fn test_unknown_serializer_id_is_rejected() {
        let sender = Codec::new(CodecKind::Framed, Arc::new(MarkerSerializer));
        let receiver = Codec::with_serializers(CodecKind::Framed, Arc::new(JsonSerializer), []);
        let bytes = sender.encode(&Message::Request(sample_request())).unwrap();
        assert!(matches!(receiver.decode(bytes), Err(OrbitError::Codec(_))));
    }

    /// Serializes everything as JSON except responses whose result contains
    /// the string "poison".
    struct MarkerSerializer;

    impl Serializer for MarkerSerializer {
        fn id(&self) -> u8 {
            9
        }
        fn name(&self) -> &'static str {
            "marker"
        }
        fn serialize_request(&self, request: &Request) -> Result<Vec<u8>> {
            JsonSerializer.serialize_request(request)
        }
        fn deserialize_request(&self, bytes: &[u8]) -> Result<Request> {
            JsonSerializer.deserialize_request(bytes)
        }
        fn serialize_response(&self, response: &Response) -> Result<Vec<u8>> {
            if response.result == Some(json!("poison")) {
                return Err(OrbitError::Codec("cannot serialize poison".into()));
            }
            JsonSerializer.serialize_response(response)
        }
        fn deserialize_response(&self, bytes: &[u8]) -> Result<Response> {
            JsonSerializer.deserialize_response(bytes)
        }
        fn serialize_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
            JsonSerializer.serialize_value(value)
        }
        fn deserialize_value(&self, bytes: &[u8]) -> Result<serde_json::Value> {
            JsonSerializer.deserialize_value(bytes)
        }
        fn serialize_values(&self, values: &[serde_json::Value]) -> Result<Vec<u8>> {
            JsonSerializer.serialize_values(values)
        }
        fn deserialize_values(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>> {
            JsonSerializer.deserialize_values(bytes)
        }
    }

    #[test]
    fn test_unencodable_response_becomes_framework_error() {
        for kind in [CodecKind::Legacy, CodecKind::Framed] {
            let codec = Codec::new(kind, Arc::new(MarkerSerializer));
            let id: RequestId = 4242;
            let mut response = Response::success(id, json!("poison"));
            response.version = 7;

            let bytes = codec.encode_response(response).unwrap();
            let decoded = codec.decode(bytes).unwrap();
            let Message::Response(fallback) = decoded.message else {
                panic!("expected a response");
            };
            assert_eq!(fallback.id, id);
            assert_eq!(fallback.version, 7);
            assert!(fallback.result.is_none());
            let exception: RemoteException = fallback.exception.unwrap();
            assert!(!exception.is_business());
            assert!(exception.message.contains("cannot serialize poison"));
        }
    }

    #[test]
    fn test_encode_refuses_bodies_over_the_limit() {
        let request = Request::new("demo.Echo", "echo").with_args(vec![json!("x".repeat(256))]);
        for kind in [CodecKind::Legacy, CodecKind::Framed] {
            let codec = Codec::new(kind, Arc::new(JsonSerializer)).with_max_frame_size(64);
            let err = codec.encode(&Message::Request(request.clone())).unwrap_err();
            assert!(matches!(err, OrbitError::FrameTooLarge(_, 64)), "{kind}: {err}");
        }
    }

    #[test]
    fn test_oversized_response_falls_back_to_framework_error() {
        let codec = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer)).with_max_frame_size(512);
        let bytes = codec
            .encode_response(Response::success(5, json!("y".repeat(4096))))
            .unwrap();
        let Message::Response(fallback) = codec.decode(bytes).unwrap().message else {
            panic!("expected a response");
        };
        assert_eq!(fallback.id, 5);
        assert!(!fallback.exception.unwrap().is_business());
    }

    #[test]
    fn test_reject_answers_undecodable_request() {
        for kind in [CodecKind::Legacy, CodecKind::Framed] {
            let codec = Codec::new(kind, Arc::new(PostcardSerializer));
            let request = sample_request();
            let good = codec.encode(&Message::Request(request.clone())).unwrap();
            // Drop the last body byte and fix up the header length.
            let corrupted = relength(good.slice(..good.len() - 1));

            let err = codec.decode(corrupted.clone()).unwrap_err();
            let (id, reply) = codec.reject(corrupted, &err).unwrap();
            assert_eq!(id, request.id);

            let decoded = codec.decode(reply).unwrap();
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.serializer_id, POSTCARD_SERIALIZER_ID);
            let Message::Response(response) = decoded.message else {
                panic!("expected a response");
            };
            assert_eq!(response.id, request.id);
            let exception = response.exception.unwrap();
            assert!(!exception.is_business());
            assert!(exception.message.contains("failed to decode request"));
        }
    }

    #[test]
    fn test_reject_falls_back_to_own_serializer() {
        let sender = Codec::new(CodecKind::Framed, Arc::new(MarkerSerializer));
        let receiver = Codec::with_serializers(CodecKind::Framed, Arc::new(JsonSerializer), []);
        let request = sample_request();
        let bytes = sender.encode(&Message::Request(request.clone())).unwrap();

        let err = receiver.decode(bytes.clone()).unwrap_err();
        let (id, reply) = receiver.reject(bytes, &err).unwrap();
        assert_eq!(id, request.id);
        let decoded = receiver.decode(reply).unwrap();
        assert_eq!(decoded.serializer_id, JsonSerializer.id());
        assert!(matches!(decoded.message, Message::Response(_)));
    }

    #[test]
    fn test_reject_ignores_responses_and_garbage() {
        let codec = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer));
        let response = codec
            .encode(&Message::Response(Response::success(1, json!(1))))
            .unwrap();
        let err = OrbitError::Codec("x".into());
        assert!(codec.reject(response, &err).is_none());
        assert!(codec.reject(Bytes::from_static(b"\x0b"), &err).is_none());
    }

    /// Rewrites the length field after the body was shortened.
    fn relength(bytes: Bytes) -> Bytes {
        let mut buf = bytes.to_vec();
        let body = (buf.len() - HEADER_LEN) as u32;
        buf[12..16].copy_from_slice(&body.to_be_bytes());
        Bytes::from(buf)
    }

    #[test]
    fn test_codec_kind_names() {
        assert_eq!(CodecKind::from_name("legacy").unwrap(), CodecKind::Legacy);
        assert_eq!(CodecKind::from_name("framed").unwrap(), CodecKind::Framed);
        assert!(CodecKind::from_name("gzip").is_err());
        assert_eq!(CodecKind::Framed.to_string(), "framed");
    }
}
