//! Sink connection and registration handshake.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::types::Nv12Frame;
use crate::error::WireError;
use crate::wire::codec::SinkCodec;
use crate::wire::message::{DEFAULT_ORIGIN, Request};

/// Deadline for the registration reply.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for flushing queued frames on disconnect.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Frames queued for the writer before `send` waits.
const OUTBOUND_QUEUE: usize = 4;

type SinkFramed = Framed<TcpStream, SinkCodec>;

// ── SinkAddress ──────────────────────────────────────────────────

/// Host and port of the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkAddress {
    host: String,
    port: u16,
}

impl SinkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Connection ───────────────────────────────────────────────────

/// A registered connection to the sink.
///
/// Frames are queued to a writer task that sends them in order; a reader
/// task watches replies and marks the connection dead when the sink
/// reports an error or closes the socket.
#[derive(Debug)]
pub struct Connection {
    tx: Option<mpsc::Sender<Bytes>>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    peer: SinkAddress,
}

impl Connection {
    /// Connect, send `Register`, and wait up to `deadline` for a reply
    /// granting the registration.
    ///
    /// Any failure drops the socket before returning.
    pub async fn register(
        peer: &SinkAddress,
        origin: &str,
        deadline: Duration,
    ) -> Result<Self, WireError> {
        let stream = TcpStream::connect((peer.host(), peer.port())).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, SinkCodec::new());

        framed.send(Request::register(origin).encode()?).await?;
        let reply = match timeout(deadline, framed.next()).await {
            Err(_) => return Err(WireError::Timeout(deadline)),
            Ok(None) => return Err(WireError::Closed),
            Ok(Some(reply)) => reply?,
        };
        if let Some(error) = reply.error_text() {
            return Err(WireError::Rejected(error.to_string()));
        }
        if !reply.is_registered() {
            return Err(WireError::NotRegistered);
        }

        Ok(Self::spawn(framed, peer.clone()))
    }

    fn spawn(framed: SinkFramed, peer: SinkAddress) -> Self {
        let (sink, stream) = framed.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let live = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&live), cancel.clone()));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&live), cancel.clone()));

        Self {
            tx: Some(tx),
            live,
            cancel,
            writer: Some(writer),
            reader: Some(reader),
            peer,
        }
    }

    /// Lock-free liveness check.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Queue one encoded request body for sending.
    ///
    /// Returns once the body is queued; it does not wait for the sink.
    pub async fn send(&self, body: Bytes) -> Result<(), WireError> {
        if !self.is_live() {
            return Err(WireError::NotConnected);
        }
        let tx = self.tx.as_ref().ok_or(WireError::NotConnected)?;
        tx.send(body).await.map_err(|_| WireError::Closed)
    }

    /// Best-effort shutdown: let the writer drain and flush within
    /// [`FLUSH_TIMEOUT`], then stop both tasks and drop the socket.
    pub async fn close(mut self) {
        self.live.store(false, Ordering::Release);
        drop(self.tx.take());

        if let Some(mut writer) = self.writer.take() {
            match timeout(FLUSH_TIMEOUT * 2, &mut writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(peer = %self.peer, "writer task failed: {e}"),
                Err(_) => {
                    debug!(peer = %self.peer, "writer did not finish in time");
                    writer.abort();
                }
            }
        }
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!(peer = %self.peer, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
        self.cancel.cancel();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<SinkFramed, Bytes>,
    mut rx: mpsc::Receiver<Bytes>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let body = tokio::select! {
            _ = cancel.cancelled() => break,
            body = rx.recv() => body,
        };
        let Some(body) = body else { break };
        if let Err(e) = sink.send(body).await {
            warn!("sink write failed: {e}");
            break;
        }
    }
    live.store(false, Ordering::Release);
    cancel.cancel();

    match timeout(FLUSH_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("closing sink stream failed: {e}"),
        Err(_) => debug!("flush timed out"),
    }
}

async fn read_loop(
    mut stream: SplitStream<SinkFramed>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(reply)) => {
                if let Some(error) = reply.error_text() {
                    warn!(error, "sink rejected the stream");
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("bad reply from sink: {e}");
                break;
            }
            None => {
                info!("sink closed the connection");
                break;
            }
        }
    }
    live.store(false, Ordering::Release);
    cancel.cancel();
}

// ── WireClient ───────────────────────────────────────────────────

/// Owns at most one [`Connection`] to the sink.
pub struct WireClient {
    address: SinkAddress,
    origin: String,
    register_timeout: Duration,
    connection: Option<Connection>,
}

impl WireClient {
    pub fn new(address: SinkAddress) -> Self {
        Self {
            address,
            origin: DEFAULT_ORIGIN.to_string(),
            register_timeout: REGISTER_TIMEOUT,
            connection: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_register_timeout(mut self, deadline: Duration) -> Self {
        self.register_timeout = deadline;
        self
    }

    pub fn address(&self) -> &SinkAddress {
        &self.address
    }

    /// Open a fresh registered connection, replacing any previous one.
    pub async fn register(&mut self) -> Result<(), WireError> {
        self.disconnect().await;
        let connection =
            Connection::register(&self.address, &self.origin, self.register_timeout).await?;
        info!(sink = %self.address, origin = %self.origin, "registered with sink");
        self.connection = Some(connection);
        Ok(())
    }

    /// `true` while a registered connection is live.
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_live)
    }

    /// Encode and queue one frame.
    pub async fn send_image(&self, frame: &Nv12Frame) -> Result<(), WireError> {
        let body = Request::image(frame).encode()?;
        self.send_encoded(body).await
    }

    /// Queue an already encoded request body.
    pub async fn send_encoded(&self, body: Bytes) -> Result<(), WireError> {
        match &self.connection {
            Some(connection) => connection.send(body).await,
            None => Err(WireError::NotConnected),
        }
    }

    /// Drop the current connection, if any.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}
