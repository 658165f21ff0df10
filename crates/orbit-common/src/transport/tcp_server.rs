use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::{read_frame, write_frame, Codec, MAX_FRAME_SIZE};
use crate::protocol::error::{OrbitError, Result};
use crate::protocol::Message;
use crate::transport::{EndpointState, MessageHandler, StateCell, TransportServer};
use crate::url::Url;

/// Async TCP server for Orbit providers.
///
/// Accepts connections in a loop and spawns a task per connection. Each
/// connection processes requests concurrently: every decoded request is
/// dispatched on its own task and responses are written back in completion
/// order through a per-connection writer task.
pub struct TcpServer {
    url: Url,
    codec: Codec,
    handler: Arc<dyn MessageHandler>,
    max_frame_size: usize,
    state: StateCell,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Creates a server for `url`; nothing is bound until [`open`](TransportServer::open).
    pub fn new(url: Url, codec: Codec, handler: Arc<dyn MessageHandler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            url,
            codec,
            handler,
            max_frame_size: MAX_FRAME_SIZE,
            state: StateCell::new(),
            local_addr: Mutex::new(None),
            shutdown,
            accept_task: Mutex::new(None),
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

async fn accept_loop(
    listener: TcpListener,
    codec: Codec,
    handler: Arc<dyn MessageHandler>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                tracing::debug!(%peer_addr, "Connection established");
                let codec = codec.clone();
                let handler = Arc::clone(&handler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, codec, handler, max_frame_size, shutdown).await
                    {
                        tracing::warn!(%peer_addr, error = %e, "Connection error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Handle a single TCP connection.
///
/// Processes requests until the peer closes the connection, the stream
/// becomes unreadable or the server shuts down.
async fn handle_connection(
    stream: TcpStream,
    codec: Codec,
    handler: Arc<dyn MessageHandler>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                tracing::warn!(error = %e, "Failed to send response");
                break;
            }
        }
    });

    let result = loop {
        let next = tokio::select! {
            next = read_frame(&mut reader, max_frame_size) => next,
            _ = shutdown.changed() => break Ok(()),
        };

        let bytes = match next {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("Connection closed by peer");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let decoded = match codec.decode(bytes.clone()) {
            Ok(decoded) => decoded,
            Err(e @ OrbitError::InvalidMagic(_)) => break Err(e),
            Err(e) => {
                match codec.reject(bytes, &e) {
                    Some((request_id, reply)) => {
                        tracing::warn!(request_id, error = %e, "Failed to decode request, answering with framework error");
                        let _ = tx.send(reply);
                    }
                    None => tracing::warn!(error = %e, "Failed to decode request"),
                }
                continue;
            }
        };

        let reply = match codec.for_reply(&decoded) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "No codec to answer request with");
                continue;
            }
        };

        let request = match decoded.message {
            Message::Request(request) => request,
            Message::Response(response) => {
                tracing::warn!(request_id = response.id, "Unexpected response on server connection");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut response = handler.handle(request).await;
            response.mark_sent();
            match reply.encode_response(response) {
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode fallback response"),
            }
        });
    };

    drop(tx);
    if *shutdown.borrow() {
        writer.abort();
    } else {
        let _ = writer.await;
    }
    result
}

#[async_trait]
impl TransportServer for TcpServer {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<()> {
        match self.state.get() {
            EndpointState::Active => return Ok(()),
            EndpointState::Closed => return Err(OrbitError::NotActive(self.url.address())),
            EndpointState::Created => {}
        }

        let bind_addr = self.url.address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| OrbitError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| OrbitError::Connection(format!("Failed to get local addr: {}", e)))?;

        if !self.state.activate() {
            return match self.state.get() {
                EndpointState::Active => Ok(()),
                _ => Err(OrbitError::NotActive(bind_addr)),
            };
        }

        *self.local_addr.lock() = Some(local);
        let task = tokio::spawn(accept_loop(
            listener,
            self.codec.clone(),
            Arc::clone(&self.handler),
            self.max_frame_size,
            self.shutdown.subscribe(),
        ));
        *self.accept_task.lock() = Some(task);

        tracing::info!(%local, codec = %self.codec.kind(), "Server listening");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.get() == EndpointState::Active
    }

    fn state(&self) -> EndpointState {
        self.state.get()
    }

    async fn close(&self) {
        if self.state.close() != EndpointState::Active {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!(address = %self.url.address(), "Server closed");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}
