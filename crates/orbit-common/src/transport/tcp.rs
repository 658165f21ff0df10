use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{read_frame, write_frame, Codec};
use crate::future::RpcFuture;
use crate::health;
use crate::protocol::error::{OrbitError, Result};
use crate::protocol::{Message, Request, RequestId};
use crate::transport::{
    ClientConfig, EndpointState, MessageHandler, StateCell, Transport, TransportClient,
    TransportServer,
};
use crate::url::Url;

use super::tcp_server::TcpServer;

type PendingMap = Arc<DashMap<RequestId, RpcFuture>>;

/// Multiplexed TCP client for one provider.
///
/// A writer task drains an unbounded queue of encoded frames; a reader task
/// decodes responses and completes the matching [`RpcFuture`]. Losing the
/// connection fails every pending future and leaves the client inactive
/// until [`open`](TransportClient::open) is called again.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use orbit_common::codec::{Codec, CodecKind};
/// use orbit_common::serialize::JsonSerializer;
/// use orbit_common::transport::{TcpClient, TransportClient};
/// use orbit_common::protocol::Request;
/// use orbit_common::url::Url;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let url = Url::parse("orbit://127.0.0.1:20880/demo.Echo")?;
/// let client = TcpClient::new(url, Codec::new(CodecKind::Framed, Arc::new(JsonSerializer)));
/// client.open().await?;
///
/// let request = Request::new("demo.Echo", "echo").with_args(vec![json!("hi")]);
/// let response = client.request(request)?.wait().await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpClient {
    url: Url,
    codec: Codec,
    config: ClientConfig,
    state: StateCell,
    connection: Mutex<Option<Connection>>,
}

/// One established stream. Pending requests belong to the stream they were
/// written on, so a replacement connection never inherits stale futures.
struct Connection {
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    local: SocketAddr,
    remote: SocketAddr,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stops both tasks and fails whatever is still pending.
    ///
    /// Must not be called with the client's connection lock held: failing a
    /// future runs its listeners inline.
    fn shutdown(self, reason: &str) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        fail_pending(&self.pending, reason);
    }
}

impl TcpClient {
    pub fn new(url: Url, codec: Codec) -> Self {
        let config = ClientConfig::from_url(&url);
        Self::with_config(url, codec, config)
    }

    pub fn with_config(url: Url, codec: Codec, config: ClientConfig) -> Self {
        Self {
            url,
            codec,
            config,
            state: StateCell::new(),
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Requests written on the current connection but not yet answered.
    pub fn pending_count(&self) -> usize {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |conn| conn.pending.len())
    }

    fn has_live_connection(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Connects to a remote endpoint.
    ///
    /// Resolves the address (which may resolve to multiple addresses) and
    /// attempts each until one succeeds within the connect timeout.
    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.url.address();
        let socket_addrs = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(|e| OrbitError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(socket_addr))
                .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!(
                        "timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    ))
                }
            }
        }

        Err(OrbitError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "no address resolved".to_string())
        )))
    }

    async fn establish(&self) -> Result<Connection> {
        let stream = self.connect().await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(write_loop(write_half, rx));
        let reader = tokio::spawn(read_loop(
            read_half,
            self.codec.clone(),
            self.config.max_frame_size,
            Arc::clone(&pending),
            Arc::clone(&alive),
            remote,
        ));

        Ok(Connection {
            outbound,
            pending,
            alive,
            local,
            remote,
            reader,
            writer,
        })
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!(error = %e, "Failed to write request frame");
            break;
        }
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    codec: Codec,
    max_frame_size: usize,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    remote: SocketAddr,
) {
    let mut reader = BufReader::new(reader);
    let reason = loop {
        let bytes = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break "connection closed by provider".to_string(),
            Err(e) => break e.to_string(),
        };

        match codec.decode(bytes) {
            Ok(decoded) => match decoded.message {
                Message::Response(mut response) => {
                    response.mark_received();
                    match pending.remove(&response.id) {
                        Some((_, future)) => {
                            future.complete(response);
                        }
                        None => {
                            tracing::debug!(request_id = response.id, "Dropping response with no pending request");
                        }
                    }
                }
                Message::Request(request) => {
                    tracing::warn!(request_id = request.id, "Unexpected request on client connection");
                }
            },
            Err(e @ OrbitError::InvalidMagic(_)) => break e.to_string(),
            Err(e) => tracing::warn!(%remote, error = %e, "Failed to decode response"),
        }
    };

    alive.store(false, Ordering::SeqCst);
    tracing::debug!(%remote, %reason, "Client connection ended");
    fail_pending(&pending, &reason);
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let ids: Vec<RequestId> = pending.iter().map(|e| *e.key()).collect();
    for id in ids {
        if let Some((_, future)) = pending.remove(&id) {
            future.fail(OrbitError::Connection(reason.to_string()));
        }
    }
}

enum Opened {
    Connected,
    Reconnected,
    AlreadyActive,
    Closed,
}

#[async_trait]
impl TransportClient for TcpClient {
    fn url(&self) -> &Url {
        &self.url
    }

    /// Connects a fresh client, or replaces the connection of an active
    /// client whose stream has been lost. A live connection is left alone.
    async fn open(&self) -> Result<()> {
        match self.state.get() {
            EndpointState::Closed => return Err(OrbitError::NotActive(self.url.identity())),
            EndpointState::Active if self.has_live_connection() => return Ok(()),
            _ => {}
        }

        let fresh = self.establish().await?;
        let (local, remote) = (fresh.local, fresh.remote);

        let (opened, discard) = {
            let mut slot = self.connection.lock();
            self.state.activate();
            match self.state.get() {
                EndpointState::Active if slot.as_ref().is_some_and(Connection::is_alive) => {
                    (Opened::AlreadyActive, Some(fresh))
                }
                EndpointState::Active => {
                    let stale = slot.replace(fresh);
                    let opened = if stale.is_some() {
                        Opened::Reconnected
                    } else {
                        Opened::Connected
                    };
                    (opened, stale)
                }
                _ => (Opened::Closed, Some(fresh)),
            }
        };

        match opened {
            Opened::Connected => {
                tracing::debug!(%local, %remote, codec = %self.codec.kind(), "Client connected");
                Ok(())
            }
            Opened::Reconnected => {
                if let Some(stale) = discard {
                    stale.shutdown("connection replaced");
                }
                tracing::info!(%local, %remote, url = %self.url.identity(), "Client reconnected");
                Ok(())
            }
            Opened::AlreadyActive => {
                if let Some(fresh) = discard {
                    fresh.shutdown("superseded by a concurrent open");
                }
                Ok(())
            }
            Opened::Closed => {
                if let Some(fresh) = discard {
                    fresh.shutdown("client closed");
                }
                Err(OrbitError::NotActive(self.url.identity()))
            }
        }
    }

    fn request(&self, request: Request) -> Result<RpcFuture> {
        if self.state.get() != EndpointState::Active {
            return Err(OrbitError::NotActive(self.url.identity()));
        }
        let (outbound, pending, alive) = match &*self.connection.lock() {
            Some(conn) if conn.is_alive() => (
                conn.outbound.clone(),
                Arc::clone(&conn.pending),
                Arc::clone(&conn.alive),
            ),
            _ => return Err(OrbitError::NotActive(self.url.identity())),
        };

        let id = request.id;
        let frame = self.codec.encode(&Message::Request(request))?;
        let future = RpcFuture::new(id);
        pending.insert(id, future.clone());

        let listener_pending = Arc::clone(&pending);
        future.add_listener(move |_| {
            listener_pending.remove(&id);
        });

        // The read loop clears `alive` before draining `pending`, so a request
        // inserted after the drain is caught here.
        if !alive.load(Ordering::SeqCst) || outbound.send(frame).is_err() {
            pending.remove(&id);
            return Err(OrbitError::Connection(format!(
                "connection to {} is gone",
                self.url.address()
            )));
        }
        Ok(future)
    }

    async fn check_health(&self, timeout: Duration) -> Result<()> {
        let future = self.request(health::create_request())?;
        match future.wait_timeout(timeout).await {
            Ok(response) => response.into_result().map(|_| ()),
            Err(e) => {
                future.cancel();
                Err(e)
            }
        }
    }

    fn is_active(&self) -> bool {
        self.state.get() == EndpointState::Active && self.has_live_connection()
    }

    fn state(&self) -> EndpointState {
        self.state.get()
    }

    async fn close(&self) {
        if self.state.close() == EndpointState::Closed {
            return;
        }
        let conn = self.connection.lock().take();
        if let Some(conn) = conn {
            conn.shutdown("client closed");
        }
        tracing::debug!(url = %self.url.identity(), "Client closed");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.lock().as_ref().map(|c| c.local)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.lock().as_ref().map(|c| c.remote)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}

/// The `tcp` transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn client(&self, url: &Url, codec: Codec) -> Result<Arc<dyn TransportClient>> {
        Ok(Arc::new(TcpClient::new(url.clone(), codec)))
    }

    fn server(
        &self,
        url: &Url,
        codec: Codec,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn TransportServer>> {
        Ok(Arc::new(TcpServer::new(url.clone(), codec, handler)))
    }
}
