use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the call an exception captured in a [`Response`](super::Response)
/// belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Raised by user service logic on the provider.
    Business,
    /// Raised by the provider's dispatch machinery (unknown target, codec failure...).
    Framework,
}

/// An exception captured on the provider and shipped back inside a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteException {
    pub kind: ExceptionKind,
    /// Short type tag chosen by the service (e.g. `"IllegalArgument"`).
    pub class_name: String,
    pub message: String,
}

impl RemoteException {
    pub fn business(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::Business,
            class_name: class_name.into(),
            message: message.into(),
        }
    }

    pub fn framework(message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::Framework,
            class_name: "OrbitFrameworkError".to_string(),
            message: message.into(),
        }
    }

    pub fn is_business(&self) -> bool {
        self.kind == ExceptionKind::Business
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

/// Coarse classification used by fault-tolerance strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised by remote service logic; never retried, aborts broadcast.
    Business,
    /// Configuration, initialisation or dispatch failures.
    Framework,
    /// Network-level send/receive failure.
    Transport,
    /// No response within the configured deadline.
    Timeout,
}

#[derive(Error, Debug)]
pub enum OrbitError {
    #[error("business exception: {0}")]
    Business(RemoteException),

    #[error("remote framework error: {0}")]
    RemoteFramework(String),

    #[error("no extension named '{name}' registered for {point}")]
    ExtensionNotFound { point: String, name: String },

    #[error("extension '{name}' is already registered for {point}")]
    DuplicateExtension { point: String, name: String },

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid magic: {0:#06x}")]
    InvalidMagic(u16),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0} is not active")]
    NotActive(String),

    #[error("no active provider available for {0}")]
    NoProvider(String),

    #[error("no service exported for {interface} (group: {group}, version: {version}) on {address}")]
    ServiceNotFound {
        interface: String,
        group: String,
        version: String,
        address: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("provider {url} failed: {source}")]
    Provider {
        url: String,
        #[source]
        source: Box<OrbitError>,
    },

    #[error("invocation of {url} failed: {source}")]
    Invocation {
        url: String,
        #[source]
        source: Box<OrbitError>,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrbitError {
    /// Classifies the error, looking through provider/invocation wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrbitError::Business(_) => ErrorKind::Business,
            OrbitError::Transport(_) | OrbitError::Connection(_) | OrbitError::Io(_) => {
                ErrorKind::Transport
            }
            OrbitError::Timeout(_) => ErrorKind::Timeout,
            OrbitError::Provider { source, .. } | OrbitError::Invocation { source, .. } => {
                source.kind()
            }
            _ => ErrorKind::Framework,
        }
    }

    pub fn is_business(&self) -> bool {
        self.kind() == ErrorKind::Business
    }

    /// Transport failures and timeouts; broadcast logs these and moves on.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }

    /// Wraps `self` with the provider Url it was raised against, unless it is
    /// a business exception or already names a provider.
    pub fn at_provider(self, url: impl Into<String>) -> Self {
        match self {
            OrbitError::Business(_) | OrbitError::Provider { .. } => self,
            other => OrbitError::Provider {
                url: url.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        OrbitError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::net::AddrParseError> for OrbitError {
    fn from(err: std::net::AddrParseError) -> Self {
        OrbitError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrbitError>;
