//! Framed connections
//!
//! A connection owns two tasks: a reader decoding frames into the handler and
//! a writer draining a bounded outbound queue. Either task ending cancels the
//! connection token, which stops the other.

use crate::codec::WireCodec;
use crate::compress::CompressKind;
use crate::protocol::{Envelope, MessageType, Payload};
use crate::serializer::SerializerKind;
use futures::{SinkExt, StreamExt};
use minirpc_core::{Error, ErrorCategory, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Outbound frame queue capacity
    pub outbound_queue: usize,
    /// Send a ping after this long without outbound frames
    pub write_idle: Option<Duration>,
    /// Close after this long without inbound frames
    pub read_idle: Option<Duration>,
    /// Serializer id for frames originated on this connection
    pub codec: u8,
    /// Compressor id for frames originated on this connection
    pub compression: u8,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            outbound_queue: 1024,
            write_idle: None,
            read_idle: None,
            codec: SerializerKind::Bincode.code(),
            compression: CompressKind::Gzip.code(),
        }
    }
}

/// What remains known about a frame the writer could not deliver
#[derive(Debug, Clone, PartialEq)]
pub struct UnsentFrame {
    pub message_type: MessageType,
    pub codec: u8,
    pub compression: u8,
    pub correlation_id: Option<String>,
    /// Message of a FAIL response
    pub failure: Option<String>,
}

impl UnsentFrame {
    fn of(envelope: &Envelope) -> Self {
        let failure = match &envelope.payload {
            Payload::Response(response) if !response.is_success() => Some(response.message.clone()),
            _ => None,
        };
        Self {
            message_type: envelope.message_type(),
            codec: envelope.codec,
            compression: envelope.compression,
            correlation_id: envelope.correlation_id().map(str::to_string),
            failure,
        }
    }
}

/// Receives the frames and lifecycle events of a connection
///
/// Heartbeats are answered by the connection itself and never reach the
/// handler.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, connection: &Connection, envelope: Envelope);

    /// A frame could not be encoded or written
    ///
    /// I/O failures close the connection after this returns; encode failures
    /// leave it open.
    fn on_write_error(&self, _connection: &Connection, _frame: &UnsentFrame, _error: &Error) {}

    fn on_close(&self, connection: &Connection);
}

/// Handle to a live framed connection
#[derive(Clone)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::Sender<Envelope>,
    token: CancellationToken,
    codec: u8,
    compression: u8,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Start the reader and writer tasks for `stream`
    ///
    /// The connection stops when `parent` is cancelled.
    pub fn spawn<S>(
        stream: S,
        peer: SocketAddr,
        codec: WireCodec,
        options: ConnectionOptions,
        handler: Arc<dyn FrameHandler>,
        parent: &CancellationToken,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::channel(options.outbound_queue.max(1));

        let connection = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            outbound,
            token: parent.child_token(),
            codec: options.codec,
            compression: options.compression,
        };
        debug!("Connection {} to {} established", connection.id, peer);

        tokio::spawn(write_loop(
            connection.clone(),
            FramedWrite::new(write_half, codec.clone()),
            queue,
            options.write_idle,
            handler.clone(),
        ));
        tokio::spawn(read_loop(
            connection.clone(),
            FramedRead::new(read_half, codec),
            options.read_idle,
            handler,
        ));

        connection
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Serializer id for frames originated here
    pub fn codec(&self) -> u8 {
        self.codec
    }

    /// Compressor id for frames originated here
    pub fn compression(&self) -> u8 {
        self.compression
    }

    pub fn is_open(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Open with room in the outbound queue
    pub fn is_writable(&self) -> bool {
        self.is_open() && self.outbound.capacity() > 0
    }

    /// Queue a frame without waiting
    ///
    /// A full queue is reported as `ChannelNotActive` while the connection
    /// stays open.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelNotActive(format!("connection to {} is closed", self.peer)));
        }
        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => {
                Error::ChannelNotActive(format!("outbound queue to {} is full", self.peer))
            }
            TrySendError::Closed(_) => {
                Error::ChannelNotActive(format!("connection to {} is closed", self.peer))
            }
        })
    }

    /// Queue a frame, waiting at most `timeout` for queue space
    pub async fn send_timeout(&self, envelope: Envelope, timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelNotActive(format!("connection to {} is closed", self.peer)));
        }
        self.outbound
            .send_timeout(envelope, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => Error::Timeout(format!(
                    "outbound queue to {} stayed full for {:?}",
                    self.peer, timeout
                )),
                SendTimeoutError::Closed(_) => {
                    Error::ChannelNotActive(format!("connection to {} is closed", self.peer))
                }
            })
    }

    /// Stop both tasks; queued frames are dropped
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Wait until the connection has stopped
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

async fn idle(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending().await,
    }
}

async fn write_loop<W>(
    connection: Connection,
    mut sink: FramedWrite<W, WireCodec>,
    mut queue: mpsc::Receiver<Envelope>,
    write_idle: Option<Duration>,
    handler: Arc<dyn FrameHandler>,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let envelope = tokio::select! {
            _ = connection.token.cancelled() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
            _ = idle(write_idle) => {
                trace!("Connection {} write idle, sending heartbeat", connection.id);
                Envelope::ping(connection.codec, connection.compression)
            }
        };

        let unsent = UnsentFrame::of(&envelope);
        if let Err(e) = sink.send(envelope).await {
            handler.on_write_error(&connection, &unsent, &e);
            if matches!(e.category(), ErrorCategory::Io | ErrorCategory::Transport) {
                warn!("Write to {} failed, closing: {}", connection.peer, e);
                break;
            }
            warn!("Dropped frame to {}: {}", connection.peer, e);
        }
    }

    let _ = sink.close().await;
    connection.token.cancel();
}

async fn read_loop<R>(
    connection: Connection,
    mut frames: FramedRead<R, WireCodec>,
    read_idle: Option<Duration>,
    handler: Arc<dyn FrameHandler>,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = connection.token.cancelled() => break,
            next = frames.next() => next,
            _ = idle(read_idle) => {
                info!("Closing connection to {}: read idle", connection.peer);
                break;
            }
        };

        let envelope = match next {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                warn!("Closing connection to {}: {}", connection.peer, e);
                break;
            }
            None => {
                debug!("Connection {} closed by {}", connection.id, connection.peer);
                break;
            }
        };

        match envelope.payload {
            Payload::Ping => {
                trace!("Ping from {}", connection.peer);
                if let Err(e) = connection.send(Envelope::pong_for(&envelope)) {
                    debug!("Could not answer ping from {}: {}", connection.peer, e);
                }
            }
            Payload::Pong => trace!("Pong from {}", connection.peer),
            _ => handler.on_frame(&connection, envelope),
        }
    }

    connection.token.cancel();
    handler.on_close(&connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtin_registry;
    use crate::protocol::{MessageType, Request};
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Envelope>>,
        closed: AtomicU64,
    }

    impl FrameHandler for Recorder {
        fn on_frame(&self, _connection: &Connection, envelope: Envelope) {
            self.frames.lock().push(envelope);
        }

        fn on_close(&self, _connection: &Connection) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9998".parse().unwrap()
    }

    fn pair(options: ConnectionOptions) -> (Connection, Arc<Recorder>, Framed<DuplexStream, WireCodec>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let recorder = Arc::new(Recorder::default());
        let connection = Connection::spawn(
            local,
            peer(),
            WireCodec::new(builtin_registry()),
            options,
            recorder.clone(),
            &CancellationToken::new(),
        );
        (connection, recorder, Framed::new(remote, WireCodec::new(builtin_registry())))
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_matching_sequence() {
        let (_connection, recorder, mut remote) = pair(ConnectionOptions::default());

        let mut ping = Envelope::ping(0x03, 0x01);
        ping.sequence_id = Some(7);
        remote.send(ping).await.unwrap();

        let pong = remote.next().await.unwrap().unwrap();
        assert_eq!(pong.message_type(), MessageType::HeartbeatPong);
        assert_eq!(pong.sequence_id, Some(7));
        assert!(recorder.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_idle_sends_ping() {
        let options = ConnectionOptions {
            write_idle: Some(Duration::from_millis(30)),
            ..Default::default()
        };
        let (_connection, _recorder, mut remote) = pair(options);

        let frame = tokio::time::timeout(Duration::from_secs(2), remote.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, Payload::Ping);
    }

    #[tokio::test]
    async fn test_read_idle_closes_connection() {
        let options = ConnectionOptions {
            read_idle: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (connection, recorder, mut remote) = pair(options);

        let eof = tokio::time::timeout(Duration::from_secs(2), remote.next()).await.unwrap();
        assert!(eof.is_none());
        assert!(!connection.is_open());
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_frames_reach_handler_and_queue_is_written() {
        let (connection, recorder, mut remote) = pair(ConnectionOptions::default());

        let request = Request::new("r1", "Hello:g1:v1", "hello", vec!["ping".into()]);
        remote.send(Envelope::request(0x03, 0x01, request.clone())).await.unwrap();
        connection
            .send(Envelope::request(0x01, 0x00, request.clone()))
            .unwrap();

        let written = remote.next().await.unwrap().unwrap();
        assert_eq!(written.payload, Payload::Request(request.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.frames.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(recorder.frames.lock()[0].payload, Payload::Request(request));
    }

    #[tokio::test]
    async fn test_bad_magic_closes_connection() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let recorder = Arc::new(Recorder::default());
        let connection = Connection::spawn(
            local,
            peer(),
            WireCodec::new(builtin_registry()),
            ConnectionOptions::default(),
            recorder.clone(),
            &CancellationToken::new(),
        );

        use tokio::io::AsyncWriteExt;
        remote.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        connection.closed().await;
        assert!(!connection.is_open());
        assert!(connection.send(Envelope::ping(3, 1)).is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_sends() {
        let (connection, _recorder, _remote) = pair(ConnectionOptions::default());
        assert!(connection.is_writable());
        connection.close();
        assert!(!connection.is_writable());
        assert!(matches!(
            connection.send(Envelope::ping(3, 1)),
            Err(Error::ChannelNotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue_leaves_connection_open() {
        let options = ConnectionOptions {
            outbound_queue: 1,
            ..Default::default()
        };
        let (connection, _recorder, _remote) = pair(options);

        // The writer task has not run yet, so the first frame fills the queue
        connection.send(Envelope::ping(3, 1)).unwrap();
        assert!(!connection.is_writable());
        assert!(matches!(
            connection.send(Envelope::ping(3, 1)),
            Err(Error::ChannelNotActive(_))
        ));
        assert!(connection.is_open());
    }

    #[derive(Default)]
    struct WriteErrors {
        unsent: Mutex<Vec<UnsentFrame>>,
    }

    impl FrameHandler for WriteErrors {
        fn on_frame(&self, _connection: &Connection, _envelope: Envelope) {}

        fn on_write_error(&self, _connection: &Connection, frame: &UnsentFrame, _error: &Error) {
            self.unsent.lock().push(frame.clone());
        }

        fn on_close(&self, _connection: &Connection) {}
    }

    #[tokio::test]
    async fn test_encode_failure_is_reported_and_connection_survives() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let errors = Arc::new(WriteErrors::default());
        let connection = Connection::spawn(
            local,
            peer(),
            WireCodec::with_max_frame_length(builtin_registry(), 64),
            ConnectionOptions::default(),
            errors.clone(),
            &CancellationToken::new(),
        );
        let mut remote = Framed::new(remote, WireCodec::new(builtin_registry()));

        let oversized = crate::protocol::Response::fail("r9", "x".repeat(200));
        connection.send(Envelope::response(0x01, 0x00, oversized)).unwrap();
        connection.send(Envelope::ping(0x01, 0x00)).unwrap();

        // The ping behind the rejected frame still goes out
        let frame = remote.next().await.unwrap().unwrap();
        assert_eq!(frame.payload, Payload::Ping);
        assert!(connection.is_open());

        let unsent = errors.unsent.lock().clone();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].message_type, MessageType::Response);
        assert_eq!(unsent[0].correlation_id.as_deref(), Some("r9"));
        assert_eq!(unsent[0].failure, Some("x".repeat(200)));
    }
}
