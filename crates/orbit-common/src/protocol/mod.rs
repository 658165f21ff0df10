pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorKind, ExceptionKind, OrbitError, RemoteException, Result};
pub use requests::{canonical_signature, generate_request_id, Request, RequestId, RpcArgs};
pub use responses::{Response, RpcResult};

/// Wire protocol version stamped into every response.
pub const PROTOCOL_VERSION: u8 = 1;

/// A decoded unit of traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn id(&self) -> RequestId {
        match self {
            Message::Request(r) => r.id,
            Message::Response(r) => r.id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
        }
    }
}

/// Message-type flag carried in frame headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Other = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::Request,
            1 => MessageType::Response,
            _ => MessageType::Other,
        }
    }
}
