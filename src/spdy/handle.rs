//! Async driver around [`SpdySession`].
//!
//! A reader task feeds transport bytes into the session and a writer task
//! drains [`SpdySession::next_write`] onto the socket. Callers talk to the
//! session through [`SpdySessionHandle`] and [`SpdyStreamHandle`], which
//! lock the session briefly and park on a [`Notify`] whenever an operation
//! has to wait for the peer.

use crate::base::context::IoResultExt;
use crate::base::failure::RequestFailure;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::base::requestpriority::RequestPriority;
use crate::socket::stream::BoxedSocket;
use crate::socket::transport::SslInfo;
use crate::spdy::earlydata::EarlyDataGate;
use crate::spdy::headers::HeaderBlock;
use crate::spdy::protocol::ErrorCode;
use crate::spdy::session::{ReadResult, SessionInfo, SpdySession, StreamRequest};
use crate::spdy::sessionkey::SpdySessionKey;
use crate::spdy::stream::StreamKey;
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Notify};

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Frames are coalesced into one socket write up to this size.
const WRITE_BATCH_SIZE: usize = 64 * 1024;

/// Consecutive zero-length writes tolerated before the transport is
/// considered dead.
const MAX_ZERO_LENGTH_WRITES: usize = 1024;

/// How often unclaimed pushes are checked for expiry.
const PUSH_EXPIRY_INTERVAL: Duration = Duration::from_secs(10);

struct Shared {
    session: Mutex<SpdySession>,
    /// Any session state change callers may be waiting on.
    changed: Notify,
    /// New frames may be writable.
    write_ready: Notify,
    gate: Arc<EarlyDataGate>,
    key: SpdySessionKey,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SpdySession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the session and wake everyone who might care.
    fn with_session<T>(&self, f: impl FnOnce(&mut SpdySession) -> T) -> T {
        let result = f(&mut self.lock());
        self.notify();
        result
    }

    fn notify(&self) {
        self.write_ready.notify_one();
        self.changed.notify_waiters();
    }

    /// Re-run `poll` after every state change until it yields a value.
    async fn wait_for<T>(&self, mut poll: impl FnMut(&mut SpdySession) -> Option<T>) -> T {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = poll(&mut self.lock()) {
                return value;
            }
            notified.await;
        }
    }
}

/// Cloneable handle to a running HTTP/2 session.
#[derive(Clone)]
pub struct SpdySessionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SpdySessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdySessionHandle").field("key", &self.shared.key).finish_non_exhaustive()
    }
}

impl SpdySessionHandle {
    /// Spawn the reader, writer and push-expiry tasks for `session` over
    /// `socket`. Must be called inside a tokio runtime.
    pub fn start(socket: BoxedSocket, session: SpdySession, gate: Arc<EarlyDataGate>) -> Self {
        let key = session.key().clone();
        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            changed: Notify::new(),
            write_ready: Notify::new(),
            gate,
            key,
        });
        let (reader, writer) = tokio::io::split(socket);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(read_loop(shared.clone(), reader, shutdown_rx.clone()));
        tokio::spawn(write_loop(shared.clone(), writer, shutdown_tx));
        tokio::spawn(expiry_loop(Arc::downgrade(&shared), shutdown_rx));

        shared.write_ready.notify_one();
        Self { shared }
    }

    pub fn key(&self) -> &SpdySessionKey {
        &self.shared.key
    }

    pub fn is_available(&self) -> bool {
        self.shared.lock().is_available()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().is_closed()
    }

    pub fn ssl_info(&self) -> SslInfo {
        self.shared.lock().ssl_info().clone()
    }

    pub fn supports_websocket(&self) -> bool {
        self.shared.lock().supports_websocket()
    }

    pub fn info(&self) -> SessionInfo {
        self.shared.lock().info()
    }

    pub fn info_as_value(&self) -> serde_json::Value {
        self.shared.lock().info_as_value()
    }

    /// Open a stream, waiting for a free slot if the peer's concurrency
    /// limit is reached.
    pub async fn open_stream(&self, request: StreamRequest) -> Result<SpdyStreamHandle, NetError> {
        let receiver = self.shared.with_session(|s| s.request_stream(request));
        let key = receiver.await.map_err(|_| NetError::Http2SessionGoingAway)??;
        Ok(SpdyStreamHandle { shared: self.shared.clone(), key })
    }

    /// Claim an unclaimed pushed stream matching `request`, if any.
    pub fn try_claim_push(&self, request: &StreamRequest) -> Option<SpdyStreamHandle> {
        let key = self.shared.with_session(|s| s.claim_pushed_stream(request))?;
        Some(SpdyStreamHandle { shared: self.shared.clone(), key })
    }

    pub fn send_ping(&self, payload: [u8; 8]) {
        self.shared.with_session(|s| s.send_ping(payload));
    }

    /// Abort the session and everything on it.
    pub fn close(&self, error: NetError) {
        self.shared.with_session(|s| s.close_session(error, "closed by client"));
    }

    /// Resolves once the session is drained or aborted.
    pub async fn closed(&self) -> Option<NetError> {
        self.shared.wait_for(|s| s.is_closed().then(|| s.error_on_close())).await
    }
}

/// One request/response exchange on a session. Dropping it cancels the
/// stream if it is still open.
pub struct SpdyStreamHandle {
    shared: Arc<Shared>,
    key: StreamKey,
}

impl std::fmt::Debug for SpdyStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdyStreamHandle").field("key", &self.key).finish()
    }
}

impl SpdyStreamHandle {
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Wire id, once the HEADERS went out.
    pub fn stream_id(&self) -> Option<u32> {
        self.shared.lock().stream(self.key).and_then(|s| s.id())
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.lock().stream_load_state(self.key)
    }

    /// Send the request headers. Requests that are not replay-safe first
    /// wait for the handshake to be confirmed. Resolves once the HEADERS
    /// have been serialized.
    pub async fn send_request_headers(&self, fin: bool) -> Result<(), RequestFailure> {
        let needs_confirmation = self.shared.with_session(|s| {
            s.write_headers(self.key, fin)?;
            Ok::<_, RequestFailure>(s.needs_handshake_confirmation(self.key))
        })?;

        if needs_confirmation {
            if let Err(error) = self.shared.gate.confirm().await {
                tracing::debug!(%error, "handshake confirmation failed");
                self.shared.with_session(|s| s.on_handshake_failed(self.key, error));
                return Err(RequestFailure::unsent(error));
            }
            self.shared.with_session(|s| s.on_handshake_confirmed());
        }
        self.flushed().await
    }

    /// Send body bytes. Resolves once flow control let all of them out.
    pub async fn write_data(&self, data: Bytes, fin: bool) -> Result<(), RequestFailure> {
        self.shared.with_session(|s| s.write_data(self.key, data, fin))?;
        self.flushed().await
    }

    pub async fn write_trailers(&self, trailers: HeaderBlock) -> Result<(), RequestFailure> {
        self.shared.with_session(|s| s.write_trailers(self.key, trailers))?;
        self.flushed().await
    }

    async fn flushed(&self) -> Result<(), RequestFailure> {
        let key = self.key;
        self.shared
            .wait_for(|s| {
                if let Err(failure) = s.read_response_headers(key) {
                    return Some(Err(failure));
                }
                (!s.has_unsent_writes(key)).then_some(Ok(()))
            })
            .await
    }

    /// Final response headers.
    pub async fn read_response_headers(&self) -> Result<HeaderBlock, RequestFailure> {
        let key = self.key;
        self.shared.wait_for(|s| s.read_response_headers(key).transpose()).await
    }

    /// Next body chunk, `None` at end of stream.
    pub async fn read(&self) -> Result<Option<Bytes>, RequestFailure> {
        let key = self.key;
        let result = self
            .shared
            .wait_for(|s| match s.read(key) {
                Ok(ReadResult::Data(chunk)) => Some(Ok(Some(chunk))),
                Ok(ReadResult::EndOfStream) => Some(Ok(None)),
                Ok(ReadResult::Pending) => None,
                Err(failure) => Some(Err(failure)),
            })
            .await;
        // Consuming data may have queued a WINDOW_UPDATE.
        self.shared.write_ready.notify_one();
        result
    }

    /// The whole remaining body.
    pub async fn read_to_end(&self) -> Result<Bytes, RequestFailure> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    pub fn trailers(&self) -> Option<HeaderBlock> {
        self.shared.lock().read_trailers(self.key)
    }

    pub fn set_priority(&self, priority: RequestPriority) -> Result<(), NetError> {
        self.shared.with_session(|s| s.set_priority(self.key, priority))
    }

    /// Reset the stream with `error_code`.
    pub fn reset(&self, error_code: ErrorCode) {
        self.shared.with_session(|s| s.reset_stream(self.key, error_code));
    }
}

impl Drop for SpdyStreamHandle {
    fn drop(&mut self) {
        let key = self.key;
        self.shared.with_session(|s| s.release_stream(key));
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.clear();
        let result = tokio::select! {
            r = reader.read_buf(&mut buf) => r.transport_context(),
            _ = shutdown.changed() => return,
        };
        let closed = shared.with_session(|session| {
            match result {
                Ok(0) => session.on_transport_closed(NetError::ConnectionClosed),
                Ok(_) => {
                    // Errors tear the session down internally.
                    let _ = session.on_read(&buf);
                }
                Err(error) => session.on_transport_closed(error),
            }
            session.is_closed()
        });
        if closed {
            tracing::debug!(host = %shared.key.destination, "reader finished");
            return;
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: WriteHalf<BoxedSocket>,
    shutdown: watch::Sender<bool>,
) {
    loop {
        let notified = shared.write_ready.notified();
        let (batch, closed) = {
            let mut session = shared.lock();
            let mut batch = BytesMut::new();
            while batch.len() < WRITE_BATCH_SIZE {
                match session.next_write() {
                    Some(bytes) => batch.extend_from_slice(&bytes),
                    None => break,
                }
            }
            (batch, session.is_closed())
        };

        if !batch.is_empty() {
            if let Err(error) = write_fully(&mut writer, &batch).await {
                shared.with_session(|s| s.on_transport_closed(error));
                break;
            }
            // Callers waiting for their frames to be flushed.
            shared.changed.notify_waiters();
            continue;
        }
        if closed {
            break;
        }
        if let Err(error) = writer.flush().await.transport_context() {
            shared.with_session(|s| s.on_transport_closed(error));
            break;
        }
        notified.await;
    }

    let _ = writer.shutdown().await;
    let _ = shutdown.send(true);
    shared.changed.notify_waiters();
    tracing::debug!(host = %shared.key.destination, "writer finished");
}

/// Write all of `buf`, yielding on zero-length writes instead of giving up.
async fn write_fully(writer: &mut WriteHalf<BoxedSocket>, mut buf: &[u8]) -> Result<(), NetError> {
    let mut zero_writes = 0;
    while !buf.is_empty() {
        let n = writer.write(buf).await.transport_context()?;
        if n == 0 {
            zero_writes += 1;
            if zero_writes >= MAX_ZERO_LENGTH_WRITES {
                tracing::warn!(zero_writes, "transport keeps accepting zero bytes");
                return Err(NetError::ConnectionClosed);
            }
            tokio::task::yield_now().await;
            continue;
        }
        zero_writes = 0;
        buf = &buf[n..];
    }
    Ok(())
}

async fn expiry_loop(shared: std::sync::Weak<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(PUSH_EXPIRY_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return,
        }
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let expired = shared.with_session(|s| s.expire_unclaimed_pushes(Instant::now()));
        if expired > 0 {
            tracing::debug!(expired, "expired unclaimed pushes");
        }
    }
}
