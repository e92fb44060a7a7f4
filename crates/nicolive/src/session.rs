//! Comment channel session.
//!
//! A session owns one TCP connection to a comment server. The socket is split
//! into independent halves: a background task owns the read half and decodes
//! frames into [`CommentEvent`]s, while [`CommentSession::post`] writes on the
//! write half from the caller's task.
//!
//! Teardown always happens in the reader task, whichever way the session
//! ends (cancellation, peer EOF, read failure, or the consumer going away), so
//! the transport is closed exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::{CommentServer, PostKeyProvider};
use crate::codec::{Frame, NulDelimitedCodec};
use crate::config::SessionConfig;
use crate::error::{ConnectError, DecodeError, PostError};
use crate::event::CommentEvent;
use crate::lifecycle::{Lifecycle, SessionState};
use crate::mail::Mail;
use crate::record::{OutgoingChat, ThreadRequest, decode_record};
use crate::vpos::vpos_now;

type CommentReader = FramedRead<Pin<Box<dyn AsyncRead + Send>>, NulDelimitedCodec>;
type CommentWriter = FramedWrite<Pin<Box<dyn AsyncWrite + Send>>, NulDelimitedCodec>;

/// Address and thread of a comment server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub thread: i64,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16, thread: i64) -> Self {
        Self {
            host: host.into(),
            port,
            thread,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What a session needs to post comments.
#[derive(Clone)]
pub struct Poster {
    post_keys: Arc<dyn PostKeyProvider>,
    base_time: DateTime<Utc>,
    user_id: String,
}

impl Poster {
    pub fn new(
        post_keys: Arc<dyn PostKeyProvider>,
        base_time: DateTime<Utc>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            post_keys,
            base_time,
            user_id: user_id.into(),
        }
    }

    pub fn for_server(server: &CommentServer, post_keys: Arc<dyn PostKeyProvider>) -> Self {
        Self::new(post_keys, server.base_time, server.user_id.clone())
    }
}

/// State shared between the session handle and its reader task.
struct Shared {
    thread: i64,
    lifecycle: Lifecycle,
    writer: Mutex<Option<CommentWriter>>,
    cancel: CancellationToken,
}

impl Shared {
    /// Shut the write half down. Only the first call does anything.
    async fn close_transport(&self) {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        if let Err(e) = writer.close().await {
            debug!("Error while closing comment connection: {}", e);
        }
    }
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    Cancelled,
    Eof,
    ConsumerGone,
    Failed,
}

/// An open comment session.
///
/// Dropping the session cancels it; events already buffered stay readable
/// from [`CommentEvents`].
pub struct CommentSession {
    params: ConnectionParams,
    shared: Arc<Shared>,
    poster: Option<Poster>,
    events: Option<CommentEvents>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CommentSession {
    /// Connect, write the thread handshake, and start reading.
    ///
    /// `parent` cancels the session when it is cancelled.
    pub async fn open(
        params: ConnectionParams,
        res_from: i64,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect();

        let addr = params.addr();
        info!(
            "Connecting to comment server {} (thread {})",
            addr, params.thread
        );
        let connect = TcpStream::connect(addr.as_str());
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectError::Connect { addr, source }),
            Err(_) => {
                return Err(ConnectError::Timeout {
                    addr,
                    after: config.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        Self::start(params, read_half, write_half, res_from, config, parent, lifecycle).await
    }

    /// Write the handshake on an established transport and spawn the reader.
    async fn start<R, W>(
        params: ConnectionParams,
        read_half: R,
        write_half: W,
        res_from: i64,
        config: SessionConfig,
        parent: &CancellationToken,
        lifecycle: Lifecycle,
    ) -> Result<Self, ConnectError>
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let write_half: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(write_half);
        let mut writer: CommentWriter = FramedWrite::new(
            write_half,
            NulDelimitedCodec::new(config.max_frame_length),
        );

        let handshake = ThreadRequest::new(params.thread, res_from).encode()?;
        writer
            .send(handshake)
            .await
            .map_err(|source| ConnectError::Handshake { source })?;
        lifecycle.mark_open();
        debug!(
            "Joined thread {} on {} (res_from {})",
            params.thread,
            params.addr(),
            res_from
        );

        let shared = Arc::new(Shared {
            thread: params.thread,
            lifecycle,
            writer: Mutex::new(Some(writer)),
            cancel: parent.child_token(),
        });

        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let read_half: Pin<Box<dyn AsyncRead + Send>> = Box::pin(read_half);
        let frames: CommentReader = FramedRead::new(
            read_half,
            NulDelimitedCodec::new(config.max_frame_length),
        );
        let reader = tokio::spawn(read_loop(
            shared.clone(),
            frames,
            tx,
            config.read_timeout,
        ));

        Ok(Self {
            params,
            shared,
            poster: None,
            events: Some(CommentEvents { rx }),
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Open a session for `server` that is able to post.
    pub async fn connect(
        server: &CommentServer,
        res_from: i64,
        post_keys: Arc<dyn PostKeyProvider>,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        let session = Self::open(server.params.clone(), res_from, config, parent).await?;
        Ok(session.with_poster(Poster::for_server(server, post_keys)))
    }

    pub fn with_poster(mut self, poster: Poster) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        self.shared.lifecycle.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Take the event stream. There is exactly one; later calls return `None`.
    pub fn take_events(&mut self) -> Option<CommentEvents> {
        self.events.take()
    }

    /// Post a comment.
    ///
    /// A fresh post key is fetched first; if that fails nothing is written.
    /// The matching [`CommentEvent::PostAck`] arrives later on the event
    /// stream and is not awaited here.
    pub async fn post(&self, content: &str, mail: Mail) -> Result<(), PostError> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(PostError::NotOpen { state });
        }
        let poster = self.poster.as_ref().ok_or(PostError::NoPoster)?;

        let postkey = poster
            .post_keys
            .post_key(self.shared.thread)
            .await
            .map_err(PostError::PostKey)?;

        let chat = OutgoingChat {
            vpos: vpos_now(poster.base_time),
            mail: mail.to_string(),
            user_id: poster.user_id.clone(),
            postkey,
            content: content.to_owned(),
        };
        let payload = chat.encode()?;

        let mut writer = self.shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(PostError::NotOpen {
                state: self.state(),
            });
        };
        let sent = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => None,
            sent = sink.send(payload) => Some(sent),
        };
        let Some(sent) = sent else {
            // A partially written frame must never be followed by another, so
            // the write half is dropped instead of flushed.
            writer.take();
            debug!(
                "Comment write to thread {} abandoned on cancellation",
                self.shared.thread
            );
            return Err(PostError::Cancelled);
        };
        if let Err(source) = sent {
            writer.take();
            drop(writer);
            warn!(
                "Failed to write comment to thread {}: {}",
                self.shared.thread, source
            );
            self.shared.lifecycle.fail();
            self.shared.cancel.cancel();
            return Err(PostError::Write { source });
        }

        debug!(
            "Posted comment to thread {} at vpos {}",
            self.shared.thread, chat.vpos
        );
        Ok(())
    }

    /// Request shutdown without waiting for it. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if self.shared.lifecycle.begin_close() {
            debug!("Closing comment session for thread {}", self.shared.thread);
        }
        self.shared.cancel.cancel();
    }

    /// Cancel and wait until the reader task has closed the transport.
    pub async fn close(&self) {
        self.cancel();
        let handle = self.reader.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Comment reader task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CommentSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Single-consumer stream of events from a session, in wire order.
///
/// Ends after cancellation, peer EOF, or a terminal read error. On
/// cancellation, a record still waiting for buffer space when the consumer
/// falls behind is discarded; everything already buffered stays readable.
#[derive(Debug)]
pub struct CommentEvents {
    rx: mpsc::Receiver<CommentEvent>,
}

impl CommentEvents {
    pub async fn recv(&mut self) -> Option<CommentEvent> {
        self.rx.recv().await
    }
}

impl Stream for CommentEvents {
    type Item = CommentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn next_frame(
    frames: &mut CommentReader,
    read_timeout: Option<Duration>,
) -> Result<Option<Frame>, DecodeError> {
    let next = match read_timeout {
        Some(after) => tokio::time::timeout(after, frames.next())
            .await
            .map_err(|_| DecodeError::ReadTimeout { after })?,
        None => frames.next().await,
    };
    next.transpose()
}

/// Deliver one event, giving up if the session is cancelled while the
/// channel is full.
async fn deliver(
    tx: &mpsc::Sender<CommentEvent>,
    event: CommentEvent,
    cancel: &CancellationToken,
) -> Result<(), ReadOutcome> {
    let event = match tx.try_send(event) {
        Ok(()) => return Ok(()),
        Err(mpsc::error::TrySendError::Closed(_)) => return Err(ReadOutcome::ConsumerGone),
        Err(mpsc::error::TrySendError::Full(event)) => event,
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReadOutcome::Cancelled),
        sent = tx.send(event) => sent.map_err(|_| ReadOutcome::ConsumerGone),
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut frames: CommentReader,
    tx: mpsc::Sender<CommentEvent>,
    read_timeout: Option<Duration>,
) {
    let thread = shared.thread;
    let max_length = frames.decoder().max_length();

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break ReadOutcome::Cancelled,
            next = next_frame(&mut frames, read_timeout) => next,
        };

        let event = match next {
            Ok(Some(Frame::Record(frame))) => match decode_record(&frame) {
                Ok(Some(record)) => CommentEvent::from(record),
                Ok(None) => {
                    trace!("Skipping unknown record on thread {}", thread);
                    continue;
                }
                Err(e) => {
                    debug!("Failed to decode frame on thread {}: {}", thread, e);
                    CommentEvent::DecodeError(e)
                }
            },
            Ok(Some(Frame::Oversized { len })) => {
                warn!("Skipped {} byte frame on thread {}", len, thread);
                CommentEvent::DecodeError(DecodeError::FrameTooLong {
                    len,
                    max: max_length,
                })
            }
            Ok(None) => {
                info!("Comment server closed thread {}", thread);
                break ReadOutcome::Eof;
            }
            Err(e) => {
                warn!("Comment connection for thread {} failed: {}", thread, e);
                shared.lifecycle.fail();
                // Best effort: the terminal error is reported unless the
                // consumer is gone or the session is being cancelled.
                let _ = deliver(&tx, CommentEvent::DecodeError(e), &shared.cancel).await;
                break ReadOutcome::Failed;
            }
        };

        if let Err(outcome) = deliver(&tx, event, &shared.cancel).await {
            break outcome;
        }
    };

    // Wakes a post blocked on a stalled write so it releases the write half.
    shared.cancel.cancel();
    shared.close_transport().await;
    drop(frames);

    // No-ops once the session has failed.
    shared.lifecycle.begin_close();
    shared.lifecycle.finish_close();
    // The consumer sees the end of the stream only after teardown.
    drop(tx);
    debug!(
        "Comment reader for thread {} stopped ({:?}, state {})",
        thread,
        outcome,
        shared.lifecycle.state()
    );
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::io::DuplexStream;

    use super::*;
    use crate::error::ApiError;

    struct StaticKey;

    #[async_trait::async_trait]
    impl PostKeyProvider for StaticKey {
        async fn post_key(&self, _thread: i64) -> Result<String, ApiError> {
            Ok("key-1".to_owned())
        }
    }

    /// Accepts the first write (the handshake) and fails every later one.
    struct BrokenAfterFirstWrite {
        written: bool,
    }

    impl AsyncWrite for BrokenAfterFirstWrite {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.written {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            self.written = true;
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Start a posting session over in-memory pipes. The returned stream is
    /// the server end of the read side; nothing is ever sent on it.
    async fn start_with_writer<W>(write_half: W) -> (CommentSession, DuplexStream)
    where
        W: AsyncWrite + Send + 'static,
    {
        let (server, client) = tokio::io::duplex(1024);
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect();
        let session = CommentSession::start(
            ConnectionParams::new("localhost", 2805, 42),
            client,
            write_half,
            -100,
            SessionConfig::default(),
            &CancellationToken::new(),
            lifecycle,
        )
        .await
        .unwrap()
        .with_poster(Poster::new(Arc::new(StaticKey), Utc::now(), "7"));
        (session, server)
    }

    #[tokio::test]
    async fn test_write_failure_fails_session() {
        let (mut session, _server) =
            start_with_writer(BrokenAfterFirstWrite { written: false }).await;
        let mut events = session.take_events().unwrap();
        assert!(session.is_open());

        let err = session
            .post("hello", Mail::new().anonymous(true))
            .await
            .unwrap_err();
        assert!(matches!(err, PostError::Write { .. }), "{err:?}");
        assert_eq!(session.state(), SessionState::Failed);

        let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(end.is_none());
        assert!(matches!(
            session.post("again", Mail::new()).await,
            Err(PostError::NotOpen {
                state: SessionState::Failed
            })
        ));
        session.close().await;
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_stalled_post() {
        // Room for the handshake only; the peer never reads.
        let (write_half, _peer) = tokio::io::duplex(128);
        let (mut session, _server) = start_with_writer(write_half).await;
        let mut events = session.take_events().unwrap();
        let session = Arc::new(session);

        let post = tokio::spawn({
            let session = session.clone();
            async move { session.post(&"x".repeat(4096), Mail::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!post.is_finished());

        session.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), post)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PostError::Cancelled)), "{result:?}");

        let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(end.is_none());
        tokio::time::timeout(Duration::from_secs(5), session.close())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_connection_params_addr() {
        let params = ConnectionParams::new("msg.example.jp", 2805, 42);
        assert_eq!(params.addr(), "msg.example.jp:2805");
    }

    #[tokio::test]
    async fn test_events_end_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut events = CommentEvents { rx };
        tx.send(CommentEvent::DecodeError(DecodeError::xml("bad")))
            .await
            .unwrap();
        drop(tx);

        assert!(events.next().await.is_some_and(|e| e.is_error()));
        assert!(events.recv().await.is_none());
    }
}
