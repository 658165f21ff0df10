//! Loopback provider used by the unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use orbit_common::codec::{Codec, CodecKind};
use orbit_common::health::HealthCheckHandler;
use orbit_common::protocol::{RemoteException, Request, Response};
use orbit_common::serialize::JsonSerializer;
use orbit_common::transport::{MessageHandler, TcpServer, TransportServer};
use orbit_common::Url;

/// `echo` returns its first argument, `fail` raises a business exception,
/// `slow` answers after 200ms; anything else is a framework error.
#[derive(Default)]
pub struct EchoHandler {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, request: Request) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match request.method.as_str() {
            "echo" => Response::success(request.id, request.args.first().cloned().unwrap_or(json!(null))),
            "fail" => Response::failure(request.id, RemoteException::business("IllegalArgument", "bad input")),
            "slow" => {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Response::success(request.id, json!("slow"))
            }
            other => Response::framework_error(request.id, format!("no method {other}")),
        }
    }
}

/// Starts a provider on an ephemeral port; returns the server and `host:port`.
pub async fn provider(handler: EchoHandler) -> (TcpServer, String) {
    let url = Url::parse("orbit://127.0.0.1:0/demo.Echo").unwrap();
    let codec = Codec::new(CodecKind::Framed, Arc::new(JsonSerializer));
    let handler = Arc::new(HealthCheckHandler::new(Arc::new(handler)));
    let server = TcpServer::new(url, codec, handler);
    server.open().await.unwrap();
    let address = server.local_addr().unwrap().to_string();
    (server, address)
}
