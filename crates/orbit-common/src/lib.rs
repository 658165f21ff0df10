//! Orbit Common Types and Transport
//!
//! This crate provides the shared building blocks of the Orbit RPC framework.
//!
//! # Overview
//!
//! Consumers call methods on remote providers as if they were local. Every
//! other crate in the workspace builds on the pieces defined here:
//!
//! - **Url**: endpoint identity plus the option bag that configures everything
//! - **Protocol**: Request/Response types and the error model
//! - **Serializers and codecs**: two payload formats (`legacy`, `framed`) told
//!   apart by a 2-byte magic, each carrying a serializer id
//! - **Transport**: multiplexed TCP client and server
//! - **Extension registry**: named implementations resolved at run time
//! - **Registry**: provider discovery contract with static and in-memory
//!   implementations
//! - **Health check**: probe sentinel and the provider-side short-circuit
//!
//! # Components
//!
//! - [`url`] - endpoint descriptor
//! - [`protocol`] - Request, Response, OrbitError
//! - [`serialize`] / [`codec`] - serializers, payload codecs and framing
//! - [`future`] - pending-response handle
//! - [`transport`] - client/server contracts and the TCP implementation
//! - [`extension`] - SPI registry
//! - [`registry`] - discovery contract
//! - [`health`] - health-check sentinel
//! - [`shutdown`] - ordered cleanup hooks
//! - [`context`] - process-scoped context tying the registries together
//!
//! # Example
//!
//! ```
//! use orbit_common::{Request, Response, Url};
//! use serde_json::json;
//!
//! let url = Url::parse("orbit://127.0.0.1:20880/demo.Echo?timeout=3000").unwrap();
//! let request = Request::new(url.interface(), "echo")
//!     .with_parameter_types(&["String"])
//!     .with_args(vec![json!("hello")]);
//!
//! let response = Response::success(request.id, json!("hello"));
//! assert!(response.is_success());
//! ```

pub mod codec;
pub mod context;
pub mod extension;
pub mod future;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod serialize;
pub mod shutdown;
pub mod transport;
pub mod url;

pub use context::OrbitContext;
pub use future::RpcFuture;
pub use protocol::*;
pub use url::Url;
