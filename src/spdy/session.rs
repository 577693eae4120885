//! The HTTP/2 session multiplexer.
//!
//! `SpdySession` is sans-IO: bytes from the transport go in through
//! [`SpdySession::on_read`], frames to write come out of
//! [`SpdySession::next_write`], and callers drive streams through
//! [`StreamKey`]s. Everything happens inside `&mut self`, so the async
//! driver in [`crate::spdy::handle`] only needs a mutex around it.
//!
//! Based on Chromium's `SpdySession`.

use crate::base::failure::RequestFailure;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::base::requestpriority::RequestPriority;
use crate::socket::transport::SslInfo;
use crate::spdy::config::SessionConfig;
use crate::spdy::earlydata::EarlyDataGate;
use crate::spdy::flowcontrol::{FlowControlError, FlowController, StreamWindows};
use crate::spdy::frame::{encode_header_block, Frame, FrameDecoder, PrioritySpec};
use crate::spdy::headers::HeaderBlock;
use crate::spdy::hpack::{HeaderCodec, HpackCodec};
use crate::spdy::lifecycle::{Lifecycle, SessionState};
use crate::spdy::priority::{PriorityDependencies, PriorityTree};
use crate::spdy::protocol::{
    is_client_stream_id, is_push_stream_id, ErrorCode, SettingsId, CONNECTION_PREFACE,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, FIRST_STREAM_ID, MAX_MAX_FRAME_SIZE,
    MAX_STREAM_ID, MAX_WINDOW_SIZE,
};
use crate::spdy::push::{response_matches_request, PushCandidate, PushRegistry};
use crate::spdy::sessionkey::{SchemeHostPort, SpdySessionKey};
use crate::spdy::stream::{ResponsePhase, Stream, StreamKey, StreamKind, StreamTable};
use crate::spdy::writequeue::{Dequeued, QueuedWrite, Readiness, WriteItem, WriteQueue};
use bytes::{Bytes, BytesMut};
use http::Method;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;
use url::Url;

/// Chromium's limit until the server's SETTINGS arrive.
const INITIAL_MAX_CONCURRENT_STREAMS: u32 = 100;

/// What a caller wants to open a stream for.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub priority: RequestPriority,
    pub headers: HeaderBlock,
    pub is_websocket_connect: bool,
    pub has_body: bool,
}

impl StreamRequest {
    pub fn new(headers: HeaderBlock) -> Self {
        Self {
            priority: RequestPriority::default(),
            headers,
            is_websocket_connect: false,
            has_body: false,
        }
    }

    /// Request for `method` on `url` with the pseudo-headers filled in.
    pub fn for_url(method: &Method, url: &Url) -> Result<Self, NetError> {
        Ok(Self::new(HeaderBlock::request(method, url)?))
    }

    /// Extended CONNECT for a WebSocket over this session (RFC 8441).
    pub fn websocket(url: &Url) -> Result<Self, NetError> {
        let headers = HeaderBlock::websocket_connect(url)?;
        Ok(Self { is_websocket_connect: true, has_body: true, ..Self::new(headers) })
    }

    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn has_body(mut self, has_body: bool) -> Self {
        self.has_body = has_body;
        self
    }

    /// Whether the HEADERS must wait for a confirmed handshake.
    pub fn requires_confirmation(&self) -> bool {
        EarlyDataGate::requires_confirmation(self.headers.method().unwrap_or(""), self.has_body)
    }

    fn kind(&self) -> StreamKind {
        if self.is_websocket_connect {
            StreamKind::WebSocket
        } else if self.headers.method() == Some("CONNECT")
            && self.headers.get(":protocol").is_none()
        {
            StreamKind::Tunnel
        } else {
            StreamKind::Request
        }
    }
}

/// Outcome of [`SpdySession::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Data(Bytes),
    EndOfStream,
    /// Nothing buffered yet.
    Pending,
}

/// Snapshot of a session for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub host: String,
    pub proxy: Option<String>,
    pub state: SessionState,
    pub negotiated_protocol: Option<String>,
    pub active_streams: usize,
    pub unclaimed_pushed_streams: usize,
    pub created_streams: usize,
    pub pending_requests: usize,
    pub send_window: i64,
    pub recv_window: i64,
    pub max_concurrent_streams: u32,
    pub frames_received: u64,
    pub is_draining: bool,
    pub is_going_away: bool,
    pub goaway_code: Option<u32>,
    pub error_on_close: Option<i32>,
}

struct PendingStreamRequest {
    request: StreamRequest,
    sender: oneshot::Sender<Result<StreamKey, NetError>>,
}

#[derive(Debug, Clone, Copy)]
struct PeerSettings {
    max_concurrent_streams: u32,
    initial_window_size: i32,
    max_frame_size: u32,
    max_header_list_size: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: INITIAL_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BlockKind {
    Headers { end_stream: bool },
    PushPromise { promised_id: u32, associated_was_open: bool },
}

/// A header block still waiting for CONTINUATION frames.
struct PartialBlock {
    stream_id: u32,
    kind: BlockKind,
    buf: BytesMut,
}

pub struct SpdySession {
    key: SpdySessionKey,
    config: SessionConfig,
    ssl_info: SslInfo,
    streams: StreamTable,
    tree: PriorityTree,
    deps: PriorityDependencies,
    queue: WriteQueue<StreamKey>,
    flow: FlowController,
    codec: Box<dyn HeaderCodec>,
    decoder: FrameDecoder,
    read_buf: BytesMut,
    partial_block: Option<PartialBlock>,
    pushes: PushRegistry,
    lifecycle: Lifecycle,
    peer: PeerSettings,
    pending_requests: [VecDeque<PendingStreamRequest>; RequestPriority::COUNT],
    preface_pending: bool,
    next_stream_id: u32,
    last_accepted_push_id: u32,
    handshake_confirmed: bool,
    pings_in_flight: u32,
    frames_received: u64,
}

impl std::fmt::Debug for SpdySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdySession")
            .field("key", &self.key)
            .field("state", &self.lifecycle.state())
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl SpdySession {
    /// Create a session over a freshly connected transport. The preface,
    /// our SETTINGS and the initial session WINDOW_UPDATE are queued.
    ///
    /// `handshake_confirmed` is false while 0-RTT data is unconfirmed.
    pub fn new(
        key: SpdySessionKey,
        config: SessionConfig,
        ssl_info: SslInfo,
        handshake_confirmed: bool,
    ) -> Self {
        Self::with_codec(key, config, ssl_info, handshake_confirmed, Box::new(HpackCodec::new()))
    }

    pub fn with_codec(
        key: SpdySessionKey,
        config: SessionConfig,
        ssl_info: SslInfo,
        handshake_confirmed: bool,
        codec: Box<dyn HeaderCodec>,
    ) -> Self {
        let mut flow = FlowController::new(
            config.session_max_recv_window_size,
            config.window_update_threshold,
        );
        let mut queue = WriteQueue::new();
        let values = config.settings.to_frame_values();
        queue.push_control(Frame::Settings { ack: false, values });
        if let Some(increment) = flow.initial_window_update() {
            queue.push_control(Frame::WindowUpdate { stream_id: 0, increment });
        }

        tracing::debug!(host = %key.destination, "HTTP/2 session created");
        Self {
            decoder: FrameDecoder::new(config.settings.max_frame_size),
            key,
            config,
            ssl_info,
            streams: StreamTable::new(),
            tree: PriorityTree::new(),
            deps: PriorityDependencies::new(),
            queue,
            flow,
            codec,
            read_buf: BytesMut::new(),
            partial_block: None,
            pushes: PushRegistry::new(),
            lifecycle: Lifecycle::new(),
            peer: PeerSettings::default(),
            pending_requests: Default::default(),
            preface_pending: true,
            next_stream_id: FIRST_STREAM_ID,
            last_accepted_push_id: 0,
            handshake_confirmed,
            pings_in_flight: 0,
            frames_received: 0,
        }
    }

    pub fn key(&self) -> &SpdySessionKey {
        &self.key
    }

    pub fn ssl_info(&self) -> &SslInfo {
        &self.ssl_info
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Whether new streams may be opened.
    pub fn is_available(&self) -> bool {
        self.lifecycle.is_available()
    }

    /// Drained or aborted; the transport can be dropped once the remaining
    /// control frames are flushed.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn error_on_close(&self) -> Option<NetError> {
        self.lifecycle.error_on_close()
    }

    pub fn supports_websocket(&self) -> bool {
        self.lifecycle.supports_websocket()
    }

    pub fn stream(&self, key: StreamKey) -> Option<&Stream> {
        self.streams.get(key)
    }

    /// Streams bound to a wire id, pushes included.
    pub fn active_streams(&self) -> usize {
        self.streams.active_count()
    }

    pub fn unclaimed_pushed_streams(&self) -> usize {
        self.pushes.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.iter().map(VecDeque::len).sum()
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.peer.max_concurrent_streams
    }

    pub fn send_window(&self) -> i64 {
        self.flow.send_window()
    }

    pub fn recv_window(&self) -> i64 {
        self.flow.recv_window()
    }

    pub fn pings_in_flight(&self) -> u32 {
        self.pings_in_flight
    }

    /// Whether [`next_write`](Self::next_write) may have something to say.
    pub fn has_pending_writes(&self) -> bool {
        self.preface_pending || !self.queue.is_empty()
    }

    // ----- Opening streams -----

    /// Open a stream right away, or fail if the session cannot take it.
    pub fn open_stream(&mut self, request: StreamRequest) -> Result<StreamKey, NetError> {
        self.check_can_open(&request)?;
        if !self.has_stream_capacity() {
            return Err(NetError::Http2TooManyConcurrentStreams);
        }
        Ok(self.create_stream(request))
    }

    /// Queuing form of [`open_stream`](Self::open_stream). The receiver
    /// completes once a slot is free; waiters are served highest priority
    /// first, FIFO within a priority.
    pub fn request_stream(
        &mut self,
        request: StreamRequest,
    ) -> oneshot::Receiver<Result<StreamKey, NetError>> {
        let (sender, receiver) = oneshot::channel();
        if let Err(err) = self.check_can_open(&request) {
            let _ = sender.send(Err(err));
            return receiver;
        }
        if self.has_stream_capacity() && self.pending_request_count() == 0 {
            let key = self.create_stream(request);
            let _ = sender.send(Ok(key));
        } else {
            tracing::trace!(priority = ?request.priority, "stream request queued");
            let lane = request.priority.lane();
            self.pending_requests[lane].push_back(PendingStreamRequest { request, sender });
        }
        receiver
    }

    fn check_can_open(&self, request: &StreamRequest) -> Result<(), NetError> {
        if !self.lifecycle.is_available() {
            return Err(NetError::Http2SessionGoingAway);
        }
        if request.is_websocket_connect && !self.lifecycle.supports_websocket() {
            return Err(NetError::NotImplemented);
        }
        if request.headers.has_uppercase_name() {
            return Err(NetError::InvalidArgument);
        }
        Ok(())
    }

    fn open_request_streams(&self) -> usize {
        self.streams.iter().filter(|(_, s)| !s.is_push() && !s.is_closed()).count()
    }

    fn has_stream_capacity(&self) -> bool {
        self.open_request_streams() < self.peer.max_concurrent_streams as usize
    }

    fn create_stream(&mut self, request: StreamRequest) -> StreamKey {
        let kind = request.kind();
        let requires_confirmation = !self.handshake_confirmed && request.requires_confirmation();
        let windows =
            StreamWindows::new(self.peer.initial_window_size, self.config.stream_recv_window());
        let priority = request.priority;
        let mut stream = Stream::new(kind, priority, request.headers, windows, Instant::now());
        stream.requires_confirmation = requires_confirmation;
        let key = self.streams.insert(stream);
        tracing::trace!(?key, ?priority, ?kind, "stream created");
        key
    }

    fn serve_pending_requests(&mut self) {
        while self.lifecycle.is_available() && self.has_stream_capacity() {
            let Some(pending) = self.pending_requests.iter_mut().find_map(VecDeque::pop_front)
            else {
                break;
            };
            if pending.sender.is_closed() {
                continue;
            }
            let key = self.create_stream(pending.request);
            if pending.sender.send(Ok(key)).is_err() {
                self.streams.remove(key);
            }
        }
    }

    fn fail_pending_requests(&mut self, error: NetError) {
        for lane in self.pending_requests.iter_mut() {
            for pending in lane.drain(..) {
                let _ = pending.sender.send(Err(error));
            }
        }
    }

    // ----- Writing -----

    /// Queue the request headers given at open. With `fin` the request has
    /// no body.
    pub fn write_headers(&mut self, key: StreamKey, fin: bool) -> Result<(), RequestFailure> {
        let stream = self.live_stream(key)?;
        if stream.headers_queued {
            return Err(failure_of(stream, NetError::InvalidArgument));
        }
        stream.headers_queued = true;
        stream.local_fin_queued = fin;
        let block = stream.request_headers.clone();
        let priority = stream.priority;
        self.queue.push(key, priority, WriteItem::Headers { block, end_stream: fin });
        Ok(())
    }

    /// Queue body bytes. They go out as flow control allows.
    pub fn write_data(
        &mut self,
        key: StreamKey,
        data: Bytes,
        fin: bool,
    ) -> Result<(), RequestFailure> {
        let stream = self.live_stream(key)?;
        if !stream.headers_queued || stream.local_fin_queued {
            return Err(failure_of(stream, NetError::InvalidArgument));
        }
        stream.local_fin_queued = fin;
        let priority = stream.priority;
        self.queue.push(key, priority, WriteItem::Data { data, end_stream: fin });
        Ok(())
    }

    /// End the request with trailers.
    pub fn write_trailers(
        &mut self,
        key: StreamKey,
        trailers: HeaderBlock,
    ) -> Result<(), RequestFailure> {
        let stream = self.live_stream(key)?;
        if !stream.headers_queued || stream.local_fin_queued {
            return Err(failure_of(stream, NetError::InvalidArgument));
        }
        stream.local_fin_queued = true;
        let priority = stream.priority;
        self.queue.push(key, priority, WriteItem::Headers { block: trailers, end_stream: true });
        Ok(())
    }

    /// The stream behind `key`, if it may still be written to.
    fn live_stream(&mut self, key: StreamKey) -> Result<&mut Stream, RequestFailure> {
        let stream = self
            .streams
            .get_mut(key)
            .ok_or(RequestFailure::unsent(NetError::Http2StreamClosed))?;
        if let Some(error) = stream.failure {
            return Err(failure_of(stream, error));
        }
        if stream.is_closed() {
            return Err(failure_of(stream, NetError::Http2StreamClosed));
        }
        Ok(stream)
    }

    /// Whether anything queued for `key` has not been serialized yet.
    pub fn has_unsent_writes(&self, key: StreamKey) -> bool {
        self.queue.has_writes_for_stream(key)
    }

    /// HEADERS of `key` are held back until the handshake is confirmed.
    pub fn needs_handshake_confirmation(&self, key: StreamKey) -> bool {
        !self.handshake_confirmed
            && self.streams.get(key).is_some_and(|s| s.requires_confirmation && s.id.is_none())
    }

    pub fn on_handshake_confirmed(&mut self) {
        if !self.handshake_confirmed {
            tracing::debug!("handshake confirmed, releasing held requests");
        }
        self.handshake_confirmed = true;
    }

    /// Confirmation failed for the request behind `key`.
    pub fn on_handshake_failed(&mut self, key: StreamKey, error: NetError) {
        self.fail_stream(key, error, Some(ErrorCode::Cancel));
    }

    /// Serialize the next frame, or `None` if nothing can be written now.
    ///
    /// Stream ids are assigned here, when a stream's HEADERS are dequeued,
    /// so ids stay monotonic whatever order priorities impose.
    pub fn next_write(&mut self) -> Option<Bytes> {
        if self.preface_pending {
            self.preface_pending = false;
            return Some(Bytes::from_static(CONNECTION_PREFACE));
        }
        loop {
            let confirmed = self.handshake_confirmed;
            let streams = &self.streams;
            let flow = &self.flow;
            let dequeued =
                self.queue.pop(&mut self.tree, |write| readiness(streams, flow, confirmed, write))?;
            match dequeued {
                Dequeued::Control(frame) => {
                    tracing::trace!(
                        frame = frame.name(),
                        stream_id = frame.stream_id(),
                        "sending frame"
                    );
                    return Some(frame.to_bytes());
                }
                Dequeued::Stream(write) => {
                    if let Some(bytes) = self.serialize_write(write) {
                        return Some(bytes);
                    }
                }
            }
        }
    }

    fn serialize_write(&mut self, mut write: QueuedWrite<StreamKey>) -> Option<Bytes> {
        let key = write.stream;
        let (wire_id, priority) = {
            let stream = self.streams.get(key)?;
            if stream.failure.is_some() || stream.is_closed() {
                return None;
            }
            (stream.id, stream.priority)
        };

        let empty = WriteItem::Data { data: Bytes::new(), end_stream: false };
        let item = std::mem::replace(&mut write.item, empty);
        match item {
            WriteItem::Headers { block, end_stream } => {
                let (id, spec) = match wire_id {
                    Some(id) => (id, None),
                    None => match self.assign_stream_id(key, priority) {
                        Some((id, spec)) => (id, Some(spec)),
                        None => return None,
                    },
                };
                let encoded = self.codec.encode(&block);
                let mut dst = BytesMut::new();
                encode_header_block(
                    &mut dst,
                    id,
                    encoded,
                    end_stream,
                    spec,
                    self.peer.max_frame_size,
                );

                let stream = self.streams.get_mut(key)?;
                if spec.is_some() {
                    stream.on_headers_sent(end_stream);
                } else if end_stream {
                    stream.on_local_fin();
                }
                tracing::trace!(stream_id = id, end_stream, "sent HEADERS");
                self.on_stream_closed(key);
                Some(dst.freeze())
            }
            WriteItem::Data { mut data, end_stream } => {
                let id = wire_id?;
                let stream = self.streams.get_mut(key)?;
                let n = data
                    .len()
                    .min(self.flow.sendable(&stream.windows))
                    .min(self.peer.max_frame_size as usize);
                if n == 0 && !data.is_empty() {
                    write.item = WriteItem::Data { data, end_stream };
                    self.queue.requeue(write);
                    return None;
                }
                if let Err(e) = self.flow.consume_send(&mut stream.windows, n) {
                    tracing::debug!(stream_id = id, error = %e, "flow control refused queued data");
                    write.item = WriteItem::Data { data, end_stream };
                    self.queue.requeue(write);
                    return None;
                }
                let chunk = data.split_to(n);
                let fin = end_stream && data.is_empty();
                stream.sent_bytes += n as u64;
                if fin {
                    stream.on_local_fin();
                }
                if !data.is_empty() {
                    write.item = WriteItem::Data { data, end_stream };
                    self.queue.requeue(write);
                }
                tracing::trace!(stream_id = id, len = n, fin, "sent DATA");
                self.on_stream_closed(key);
                Some(Frame::data(id, chunk, fin).to_bytes())
            }
        }
    }

    fn assign_stream_id(
        &mut self,
        key: StreamKey,
        priority: RequestPriority,
    ) -> Option<(u32, PrioritySpec)> {
        if self.next_stream_id > MAX_STREAM_ID {
            tracing::warn!("stream ids exhausted");
            self.lifecycle.start_going_away();
            self.fail_stream(key, NetError::Http2SessionGoingAway, None);
            return None;
        }
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        let spec = self.deps.on_stream_creation(id, priority);
        if let Err(e) = self.tree.insert(id, spec) {
            tracing::debug!(stream_id = id, error = %e, "priority tree rejected dependency");
        }
        self.streams.activate(key, id);
        Some((id, spec))
    }

    // ----- Reading -----

    /// Next chunk of response body.
    pub fn read(&mut self, key: StreamKey) -> Result<ReadResult, RequestFailure> {
        let stream = self
            .streams
            .get_mut(key)
            .ok_or(RequestFailure::unsent(NetError::Http2StreamClosed))?;
        if let Some(error) = stream.failure {
            return Err(failure_of(stream, error));
        }
        let Some(chunk) = stream.pop_data() else {
            return Ok(if stream.remote_finished() {
                ReadResult::EndOfStream
            } else {
                ReadResult::Pending
            });
        };

        let n = chunk.len();
        if let Some(id) = stream.id.filter(|_| stream.remote_open()) {
            if let Some(increment) = self.flow.on_stream_data_consumed(&mut stream.windows, n) {
                self.queue.push_control(Frame::WindowUpdate { stream_id: id, increment });
            }
        }
        self.return_session_bytes(n);
        Ok(ReadResult::Data(chunk))
    }

    /// Final response headers, `None` while still waiting for them.
    pub fn read_response_headers(
        &self,
        key: StreamKey,
    ) -> Result<Option<HeaderBlock>, RequestFailure> {
        let stream =
            self.streams.get(key).ok_or(RequestFailure::unsent(NetError::Http2StreamClosed))?;
        if let Some(error) = stream.failure {
            return Err(failure_of(stream, error));
        }
        if let Some(headers) = &stream.response_headers {
            return Ok(Some(headers.clone()));
        }
        if stream.remote_finished() {
            return Err(failure_of(stream, NetError::IncompleteHttp2Headers));
        }
        Ok(None)
    }

    pub fn read_trailers(&self, key: StreamKey) -> Option<HeaderBlock> {
        self.streams.get(key).and_then(|s| s.trailers.clone())
    }

    pub fn stream_load_state(&self, key: StreamKey) -> LoadState {
        let Some(stream) = self.streams.get(key) else {
            return LoadState::Idle;
        };
        if !stream.request_sent || self.queue.has_writes_for_stream(key) {
            return LoadState::SendingRequest;
        }
        match stream.phase {
            ResponsePhase::AwaitingHeaders => LoadState::WaitingForResponse,
            _ => LoadState::ReadingResponse,
        }
    }

    fn return_session_bytes(&mut self, n: usize) {
        if let Some(increment) = self.flow.on_session_data_consumed(n) {
            self.queue.push_control(Frame::WindowUpdate { stream_id: 0, increment });
        }
    }

    // ----- Stream control -----

    /// Change a stream's priority. Unsent frames move to the new lane and
    /// the tree change is announced if the stream is already on the wire.
    pub fn set_priority(
        &mut self,
        key: StreamKey,
        priority: RequestPriority,
    ) -> Result<(), NetError> {
        let stream = self.streams.get_mut(key).ok_or(NetError::Http2StreamClosed)?;
        if stream.priority == priority {
            return Ok(());
        }
        stream.priority = priority;
        let id = stream.id.filter(|_| !stream.is_closed());
        self.queue.change_priority_of_writes_for_stream(key, priority);

        if let Some(id) = id {
            for update in self.deps.on_stream_update(id, priority) {
                if let Err(e) = self.tree.reprioritize(update.id, update.spec) {
                    tracing::debug!(stream_id = update.id, error = %e, "reprioritize failed");
                }
                self.queue
                    .push_control(Frame::Priority { stream_id: update.id, spec: update.spec });
            }
        }
        Ok(())
    }

    /// The caller is done with `key`. An open stream is cancelled.
    pub fn release_stream(&mut self, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };
        stream.released = true;
        if !stream.is_closed() {
            if let Some(id) = stream.id {
                let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::Cancel };
                self.queue.push_control(reset);
            }
            stream.failure.get_or_insert(NetError::Aborted);
            stream.on_reset();
        }
        self.pushes.remove_stream(key);
        self.on_stream_closed(key);
    }

    /// Cancel a stream with an explicit RST_STREAM code.
    pub fn reset_stream(&mut self, key: StreamKey, error_code: ErrorCode) {
        self.fail_stream(key, NetError::Aborted, Some(error_code));
    }

    /// Hand an unclaimed push that matches `request` to the caller.
    pub fn claim_pushed_stream(&mut self, request: &StreamRequest) -> Option<StreamKey> {
        let url = request.headers.url().ok()?;
        let streams = &self.streams;
        let key = self
            .pushes
            .find(&url, &request.headers, |k| {
                streams.get(k).and_then(|s| s.response_headers.as_ref())
            })?;
        self.pushes.claim(&url);

        let stream = self.streams.get_mut(key)?;
        stream.claimed_by = Some(request.headers.clone());
        tracing::debug!(stream_id = ?stream.id, %url, "claimed pushed stream");
        if let Err(e) = self.set_priority(key, request.priority) {
            tracing::debug!(error = %e, "could not raise pushed stream priority");
        }
        Some(key)
    }

    /// Reset pushes nobody claimed within the configured timeout.
    pub fn expire_unclaimed_pushes(&mut self, now: Instant) -> usize {
        let expired = self.pushes.take_expired(now, self.config.unclaimed_push_timeout);
        for candidate in &expired {
            tracing::debug!(
                stream_id = candidate.stream_id,
                url = %candidate.url,
                "unclaimed push expired"
            );
            self.discard_push(candidate);
        }
        expired.len()
    }

    fn discard_push(&mut self, candidate: &PushCandidate) {
        if let Some(stream) = self.streams.get_mut(candidate.key) {
            stream.released = true;
            if !stream.is_closed() {
                self.queue.push_control(Frame::RstStream {
                    stream_id: candidate.stream_id,
                    error_code: ErrorCode::Cancel,
                });
                stream.failure.get_or_insert(NetError::Aborted);
                stream.on_reset();
            }
        }
        self.on_stream_closed(candidate.key);
    }

    /// Queue a PING; the ack decrements the in-flight count.
    pub fn send_ping(&mut self, payload: [u8; 8]) {
        self.pings_in_flight += 1;
        self.queue.push_control(Frame::Ping { ack: false, payload });
    }

    fn fail_stream(&mut self, key: StreamKey, error: NetError, rst: Option<ErrorCode>) {
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };
        stream.failure.get_or_insert(error);
        if let (Some(error_code), Some(stream_id)) = (rst, stream.id) {
            if !stream.is_closed() {
                self.queue.push_control(Frame::RstStream { stream_id, error_code });
            }
        }
        tracing::debug!(stream_id = ?stream.id, %error, "stream failed");
        stream.on_reset();
        if stream.is_push() && !stream.is_claimed() {
            stream.released = true;
            self.pushes.remove_stream(key);
        }
        self.on_stream_closed(key);
    }

    /// Bookkeeping once a stream reaches Closed: free its wire id, tree node
    /// and queued frames, then let waiting requests in.
    fn on_stream_closed(&mut self, key: StreamKey) {
        let Some(stream) = self.streams.get(key) else {
            return;
        };
        if !stream.is_closed() {
            return;
        }
        let (id, released) = (stream.id, stream.released);
        if released || stream.failure.is_some() {
            self.discard_unread_data(key);
        }
        if let Some(id) = id {
            self.streams.deactivate(id);
            self.tree.remove(id);
            self.deps.on_stream_destruction(id);
        }
        self.queue.remove_writes_for_stream(key);
        if released {
            self.streams.remove(key);
        }
        self.serve_pending_requests();
        self.maybe_finish_draining();
    }

    /// Body bytes nobody will read still count against the session window
    /// until they are handed back.
    fn discard_unread_data(&mut self, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };
        let n = stream.discard_data();
        if n > 0 && !self.lifecycle.is_closed() {
            tracing::trace!(
                stream_id = ?stream.id,
                bytes = n,
                "returning unread data to session window"
            );
            self.return_session_bytes(n);
        }
    }

    fn maybe_finish_draining(&mut self) {
        let has_streams = self.streams.iter().any(|(_, s)| !s.is_closed());
        if self.lifecycle.maybe_finish_draining(has_streams) {
            tracing::debug!(host = %self.key.destination, "session drained");
        }
    }

    // ----- Session control -----

    /// Tear the session down: fail every stream and queued request with
    /// `error` and, unless the transport is already gone, tell the peer.
    pub fn close_session(&mut self, error: NetError, description: &str) {
        if self.lifecycle.is_closed() {
            return;
        }
        tracing::warn!(host = %self.key.destination, %error, description, "closing session");
        if Lifecycle::sends_goaway_for(error) {
            self.queue.push_control(Frame::GoAway {
                last_stream_id: self.last_accepted_push_id,
                error_code: ErrorCode::from_net_error(error),
                debug_data: Bytes::copy_from_slice(description.as_bytes()),
            });
        }
        self.lifecycle.abort(error);

        for key in self.streams.keys() {
            if self.streams.get(key).is_some_and(|s| !s.is_closed()) {
                self.fail_stream(key, error, None);
            }
        }
        for candidate in self.pushes.drain() {
            self.discard_push(&candidate);
        }
        self.fail_pending_requests(error);
        self.queue.clear_stream_writes();
    }

    /// The transport failed or hit EOF.
    pub fn on_transport_closed(&mut self, error: NetError) {
        self.close_session(error, "transport closed");
    }

    // ----- Inbound -----

    /// Feed bytes read from the transport. A returned error means the
    /// session has been torn down.
    pub fn on_read(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        self.read_buf.extend_from_slice(bytes);
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.on_frame(frame)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let error = e.net_error();
                    self.close_session(error, &e.to_string());
                    return Err(error);
                }
            }
            if self.lifecycle.is_closed() {
                return Ok(());
            }
        }
    }

    /// Apply one decoded frame.
    pub fn on_frame(&mut self, frame: Frame) -> Result<(), NetError> {
        match self.dispatch_frame(frame) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.close_session(error, &error.to_string());
                Err(error)
            }
        }
    }

    fn dispatch_frame(&mut self, frame: Frame) -> Result<(), NetError> {
        self.frames_received += 1;
        if let Some(partial) = &self.partial_block {
            let continues = matches!(
                &frame,
                Frame::Continuation { stream_id, .. } if *stream_id == partial.stream_id
            );
            if !continues {
                tracing::warn!(
                    stream_id = partial.stream_id,
                    frame = frame.name(),
                    "expected CONTINUATION"
                );
                return Err(NetError::Http2ProtocolError);
            }
        }
        tracing::trace!(frame = frame.name(), stream_id = frame.stream_id(), "received frame");

        match frame {
            Frame::Data { stream_id, data, end_stream, flow_len } => {
                self.on_data(stream_id, data, end_stream, flow_len)
            }
            Frame::Headers { stream_id, block, end_stream, end_headers, .. } => {
                let kind = BlockKind::Headers { end_stream };
                self.begin_header_block(stream_id, kind, block, end_headers)
            }
            Frame::PushPromise { stream_id, promised_id, block, end_headers } => {
                let associated_was_open = self
                    .streams
                    .key_for_id(stream_id)
                    .and_then(|k| self.streams.get(k))
                    .is_some_and(|s| s.remote_open());
                let kind = BlockKind::PushPromise { promised_id, associated_was_open };
                self.begin_header_block(stream_id, kind, block, end_headers)
            }
            Frame::Continuation { stream_id, block, end_headers } => {
                let Some(mut partial) = self.partial_block.take() else {
                    tracing::warn!(stream_id, "CONTINUATION without a header block");
                    return Err(NetError::Http2ProtocolError);
                };
                partial.buf.extend_from_slice(&block);
                if !end_headers {
                    self.partial_block = Some(partial);
                    return Ok(());
                }
                let block = partial.buf.freeze();
                self.on_header_block(partial.stream_id, partial.kind, &block)
            }
            Frame::Priority { stream_id, spec } => {
                self.on_priority(stream_id, spec);
                Ok(())
            }
            Frame::RstStream { stream_id, error_code } => {
                self.on_rst_stream(stream_id, error_code);
                Ok(())
            }
            Frame::Settings { ack, values } => self.on_settings(ack, values),
            Frame::Ping { ack, payload } => {
                self.on_ping(ack, payload);
                Ok(())
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                self.on_goaway(last_stream_id, error_code, &debug_data);
                Ok(())
            }
            Frame::WindowUpdate { stream_id, increment } => {
                self.on_window_update(stream_id, increment)
            }
            Frame::Unknown { frame_type, .. } => {
                tracing::trace!(frame_type, "ignoring unknown frame");
                Ok(())
            }
        }
    }

    fn begin_header_block(
        &mut self,
        stream_id: u32,
        kind: BlockKind,
        block: Bytes,
        end_headers: bool,
    ) -> Result<(), NetError> {
        if end_headers {
            return self.on_header_block(stream_id, kind, &block);
        }
        let buf = BytesMut::from(&block[..]);
        self.partial_block = Some(PartialBlock { stream_id, kind, buf });
        Ok(())
    }

    fn on_header_block(
        &mut self,
        stream_id: u32,
        kind: BlockKind,
        block: &[u8],
    ) -> Result<(), NetError> {
        // Decode even for streams about to be rejected: the HPACK context
        // is shared by the whole connection.
        let headers = self.codec.decode(block)?;
        match kind {
            BlockKind::Headers { end_stream } => self.on_headers(stream_id, headers, end_stream),
            BlockKind::PushPromise { promised_id, associated_was_open } => {
                self.on_push_promise(stream_id, promised_id, headers, associated_was_open)
            }
        }
    }

    /// Ids that were once valid on this connection but are no longer tracked.
    fn is_known_closed(&self, id: u32) -> bool {
        if is_client_stream_id(id) {
            id < self.next_stream_id
        } else {
            id != 0 && id <= self.last_accepted_push_id
        }
    }

    fn on_headers(
        &mut self,
        id: u32,
        headers: HeaderBlock,
        end_stream: bool,
    ) -> Result<(), NetError> {
        let Some(key) = self.streams.key_for_id(id) else {
            if self.is_known_closed(id) {
                tracing::trace!(stream_id = id, "HEADERS for closed stream");
                return Ok(());
            }
            tracing::warn!(stream_id = id, "HEADERS for a stream that was never opened");
            return Err(NetError::Http2ProtocolError);
        };
        let Some(stream) = self.streams.get_mut(key) else {
            return Ok(());
        };
        if !stream.remote_open() {
            self.fail_stream(key, NetError::Http2ProtocolError, Some(ErrorCode::StreamClosed));
            return Ok(());
        }

        match stream.phase {
            ResponsePhase::AwaitingHeaders => {
                let Some(status) = headers.status() else {
                    self.fail_stream(
                        key,
                        NetError::Http2ProtocolError,
                        Some(ErrorCode::ProtocolError),
                    );
                    return Ok(());
                };
                if (100..200).contains(&status) && status != 101 {
                    if end_stream {
                        self.fail_stream(
                            key,
                            NetError::Http2ProtocolError,
                            Some(ErrorCode::ProtocolError),
                        );
                    } else {
                        tracing::trace!(stream_id = id, status, "skipping interim response");
                    }
                    return Ok(());
                }
                let mismatch = stream
                    .claimed_by
                    .as_ref()
                    .is_some_and(|request| {
                        !response_matches_request(&stream.request_headers, &headers, request)
                    });
                stream.response_headers = Some(headers);
                stream.phase = ResponsePhase::HeadersReceived;
                if stream.is_push() {
                    stream.on_push_headers();
                }
                if mismatch {
                    self.fail_stream(
                        key,
                        NetError::Http2PushedResponseDoesNotMatch,
                        Some(ErrorCode::Cancel),
                    );
                    return Ok(());
                }
            }
            ResponsePhase::HeadersReceived | ResponsePhase::ReceivingData if end_stream => {
                stream.trailers = Some(headers);
                stream.phase = ResponsePhase::TrailersReceived;
            }
            _ => {
                tracing::debug!(stream_id = id, "unexpected second header block");
                self.fail_stream(key, NetError::Http2ProtocolError, Some(ErrorCode::ProtocolError));
                return Ok(());
            }
        }

        if end_stream {
            if let Some(stream) = self.streams.get_mut(key) {
                stream.on_remote_fin();
            }
        }
        self.on_stream_closed(key);
        Ok(())
    }

    fn on_data(
        &mut self,
        id: u32,
        data: Bytes,
        end_stream: bool,
        flow_len: u32,
    ) -> Result<(), NetError> {
        if let Err(e) = self.flow.on_session_data_received(flow_len) {
            tracing::warn!(stream_id = id, error = %e, "session receive window exceeded");
            return Err(NetError::Http2FlowControlError);
        }
        let Some(key) = self.streams.key_for_id(id) else {
            if self.is_known_closed(id) {
                self.return_session_bytes(flow_len as usize);
                return Ok(());
            }
            tracing::warn!(stream_id = id, "DATA for a stream that was never opened");
            return Err(NetError::Http2ProtocolError);
        };
        let Some(stream) = self.streams.get_mut(key) else {
            return Ok(());
        };

        if stream.phase == ResponsePhase::TrailersReceived {
            tracing::warn!(stream_id = id, "DATA after trailers");
            return Err(NetError::Http2ProtocolError);
        }
        let stream_error = if !stream.remote_open() {
            Some((NetError::Http2ProtocolError, ErrorCode::StreamClosed))
        } else if stream.phase == ResponsePhase::AwaitingHeaders {
            Some((NetError::Http2ProtocolError, ErrorCode::ProtocolError))
        } else if let Err(e) = stream.windows.recv.on_received(flow_len) {
            tracing::debug!(stream_id = id, error = %e, "stream receive window exceeded");
            Some((NetError::Http2FlowControlError, ErrorCode::FlowControlError))
        } else {
            None
        };
        if let Some((error, code)) = stream_error {
            self.return_session_bytes(flow_len as usize);
            self.fail_stream(key, error, Some(code));
            return Ok(());
        }

        let padding = (flow_len as usize).saturating_sub(data.len());
        stream.phase = ResponsePhase::ReceivingData;
        stream.push_data(data);
        if padding > 0 {
            if let Some(increment) = self.flow.on_stream_data_consumed(&mut stream.windows, padding)
            {
                self.queue.push_control(Frame::WindowUpdate { stream_id: id, increment });
            }
        }
        if end_stream {
            stream.on_remote_fin();
        }
        if padding > 0 {
            self.return_session_bytes(padding);
        }
        self.on_stream_closed(key);
        Ok(())
    }

    fn on_rst_stream(&mut self, id: u32, code: ErrorCode) {
        let Some(key) = self.streams.key_for_id(id) else {
            tracing::trace!(stream_id = id, ?code, "RST_STREAM for untracked stream");
            return;
        };
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };
        tracing::debug!(stream_id = id, ?code, "received RST_STREAM");

        let error = match code {
            ErrorCode::NoError if stream.remote_finished() => None,
            ErrorCode::NoError => Some(NetError::Http2RstStreamNoErrorReceived),
            ErrorCode::RefusedStream => Some(NetError::Http2ServerRefusedStream),
            ErrorCode::Http11Required if stream.kind == StreamKind::Tunnel => {
                Some(NetError::ProxyHttp11Required)
            }
            ErrorCode::Http11Required => Some(NetError::Http11Required),
            _ => Some(NetError::Http2ProtocolError),
        };
        let error = match error {
            Some(_) if stream.is_push() && stream.is_claimed() => {
                Some(NetError::Http2ClaimedPushedStreamResetByServer)
            }
            other => other,
        };

        match error {
            Some(error) => self.fail_stream(key, error, None),
            None => {
                stream.on_reset();
                self.on_stream_closed(key);
            }
        }
    }

    fn on_settings(&mut self, ack: bool, values: Vec<(SettingsId, u32)>) -> Result<(), NetError> {
        if ack {
            tracing::trace!("SETTINGS acknowledged");
            return Ok(());
        }
        for (id, value) in values {
            match id {
                SettingsId::HeaderTableSize => self.codec.set_encoder_table_size(value),
                SettingsId::EnablePush if value > 1 => return Err(NetError::Http2ProtocolError),
                SettingsId::EnablePush => {}
                SettingsId::MaxConcurrentStreams => {
                    tracing::debug!(max = value, "peer MAX_CONCURRENT_STREAMS");
                    self.peer.max_concurrent_streams = value;
                }
                SettingsId::InitialWindowSize => {
                    if value as i64 > MAX_WINDOW_SIZE {
                        tracing::warn!(value, "INITIAL_WINDOW_SIZE too large");
                        return Err(NetError::Http2FlowControlError);
                    }
                    let old = self.peer.initial_window_size;
                    let new = value as i32;
                    let windows = self
                        .streams
                        .iter_mut()
                        .filter(|(_, s)| !s.is_closed())
                        .map(|(_, s)| &mut s.windows);
                    if let Err(e) = FlowController::apply_initial_window_change(windows, old, new) {
                        tracing::warn!(
                            error = %e,
                            "INITIAL_WINDOW_SIZE change overflowed a stream window"
                        );
                        return Err(NetError::Http2FlowControlError);
                    }
                    self.peer.initial_window_size = new;
                }
                SettingsId::MaxFrameSize => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(NetError::Http2ProtocolError);
                    }
                    self.peer.max_frame_size = value;
                }
                SettingsId::MaxHeaderListSize => self.peer.max_header_list_size = Some(value),
                SettingsId::EnableConnectProtocol => {
                    self.lifecycle.on_enable_connect_protocol(value)?
                }
                SettingsId::Unknown(raw) => tracing::trace!(id = raw, "ignoring unknown setting"),
            }
        }
        self.queue.push_control(Frame::Settings { ack: true, values: Vec::new() });
        self.serve_pending_requests();
        Ok(())
    }

    fn on_ping(&mut self, ack: bool, payload: [u8; 8]) {
        if ack {
            self.pings_in_flight = self.pings_in_flight.saturating_sub(1);
        } else if self.config.enable_ping_ack {
            self.queue.push_control(Frame::Ping { ack: true, payload });
        }
    }

    fn on_goaway(&mut self, last_stream_id: u32, code: ErrorCode, debug_data: &[u8]) {
        tracing::debug!(
            last_stream_id,
            ?code,
            debug = %String::from_utf8_lossy(debug_data),
            "received GOAWAY"
        );
        let plan = self.lifecycle.on_goaway(last_stream_id, code);
        if let Some(error) = plan.drain {
            self.close_session(error, "server requires HTTP/1.1");
            return;
        }

        for key in self.streams.keys() {
            let Some(stream) = self.streams.get(key) else {
                continue;
            };
            if stream.is_closed() {
                continue;
            }
            let wire_id = stream.id;
            match wire_id {
                Some(id) if is_client_stream_id(id) && id > plan.last_stream_id => {
                    self.fail_stream(key, plan.above_last, None)
                }
                None => self.fail_stream(key, plan.unsent, None),
                _ => {}
            }
        }
        self.fail_pending_requests(plan.unsent);
        self.maybe_finish_draining();
    }

    fn on_window_update(&mut self, id: u32, increment: u32) -> Result<(), NetError> {
        if id == 0 {
            return match self.flow.apply_session_window_update(increment) {
                Ok(size) => {
                    tracing::trace!(delta = increment, size, "session send window grew");
                    Ok(())
                }
                Err(FlowControlError::InvalidDelta(_)) => Err(NetError::Http2ProtocolError),
                Err(e) => {
                    tracing::warn!(delta = increment, error = %e, "session send window overflow");
                    Err(NetError::Http2FlowControlError)
                }
            };
        }
        let Some(key) = self.streams.key_for_id(id) else {
            return Ok(());
        };
        let Some(stream) = self.streams.get_mut(key) else {
            return Ok(());
        };
        if let Err(e) = FlowController::apply_stream_window_update(&mut stream.windows, increment) {
            tracing::debug!(
                stream_id = id,
                delta = increment,
                error = %e,
                "bad stream WINDOW_UPDATE"
            );
            self.fail_stream(
                key,
                NetError::Http2FlowControlError,
                Some(ErrorCode::FlowControlError),
            );
        }
        Ok(())
    }

    fn on_priority(&mut self, id: u32, spec: PrioritySpec) {
        if spec.dependency == id {
            match self.streams.key_for_id(id) {
                Some(key) => self.fail_stream(
                    key,
                    NetError::Http2ProtocolError,
                    Some(ErrorCode::ProtocolError),
                ),
                None => self.queue.push_control(Frame::RstStream {
                    stream_id: id,
                    error_code: ErrorCode::ProtocolError,
                }),
            }
            return;
        }
        if self.tree.contains(id) {
            if let Err(e) = self.tree.reprioritize(id, spec) {
                tracing::debug!(stream_id = id, error = %e, "ignoring peer PRIORITY");
            }
        }
    }

    fn on_push_promise(
        &mut self,
        associated_id: u32,
        promised_id: u32,
        headers: HeaderBlock,
        associated_was_open: bool,
    ) -> Result<(), NetError> {
        if !is_push_stream_id(promised_id) || !is_client_stream_id(associated_id) {
            tracing::warn!(associated_id, promised_id, "PUSH_PROMISE with bad stream ids");
            return Err(NetError::Http2ProtocolError);
        }
        if promised_id <= self.last_accepted_push_id {
            tracing::warn!(
                promised_id,
                last = self.last_accepted_push_id,
                "PUSH_PROMISE id went backwards"
            );
            return Err(NetError::Http2ProtocolError);
        }
        self.last_accepted_push_id = promised_id;

        let url = match self.validate_push(associated_id, &headers, associated_was_open) {
            Ok(url) => url,
            Err(error_code) => {
                tracing::debug!(stream_id = promised_id, ?error_code, "rejecting pushed stream");
                self.queue.push_control(Frame::RstStream { stream_id: promised_id, error_code });
                return Ok(());
            }
        };

        let now = Instant::now();
        let windows =
            StreamWindows::new(self.peer.initial_window_size, self.config.stream_recv_window());
        let mut stream =
            Stream::new(StreamKind::Push, RequestPriority::Idle, headers.clone(), windows, now);
        stream.associated_id = Some(associated_id);
        let key = self.streams.insert(stream);
        self.streams.activate(key, promised_id);

        let spec = self.deps.on_stream_creation(promised_id, RequestPriority::Idle);
        if let Err(e) = self.tree.insert(promised_id, spec) {
            tracing::debug!(stream_id = promised_id, error = %e, "priority tree rejected push");
        }
        self.queue.push_control(Frame::Priority { stream_id: promised_id, spec });

        tracing::debug!(stream_id = promised_id, associated_id, %url, "accepted pushed stream");
        self.pushes.register(PushCandidate {
            key,
            stream_id: promised_id,
            url,
            promised: headers,
            created_at: now,
        });
        Ok(())
    }

    fn validate_push(
        &self,
        associated_id: u32,
        headers: &HeaderBlock,
        associated_was_open: bool,
    ) -> Result<Url, ErrorCode> {
        if !self.lifecycle.is_available() {
            return Err(ErrorCode::RefusedStream);
        }
        let url = headers.url().map_err(|_| ErrorCode::ProtocolError)?;
        if url.scheme() != "https" {
            return Err(ErrorCode::RefusedStream);
        }

        let associated = self.streams.key_for_id(associated_id).and_then(|k| self.streams.get(k));
        if !associated.is_some_and(|s| s.remote_open()) && !associated_was_open {
            return Err(ErrorCode::ProtocolError);
        }

        let pushed_origin = SchemeHostPort::from_url(&url).ok_or(ErrorCode::ProtocolError)?;
        let associated_origin = associated
            .and_then(|s| s.url())
            .and_then(SchemeHostPort::from_url)
            .unwrap_or_else(|| self.key.destination.clone());
        if pushed_origin != associated_origin && !self.ssl_info.can_pool_for(&pushed_origin.host) {
            return Err(ErrorCode::RefusedStream);
        }

        if !matches!(headers.method(), Some("GET") | Some("HEAD")) {
            return Err(ErrorCode::RefusedStream);
        }
        if self.pushes.contains_url(&url) {
            return Err(ErrorCode::RefusedStream);
        }
        if !self.config.settings.enable_push {
            return Err(ErrorCode::RefusedStream);
        }
        let live_pushes =
            self.streams.iter().filter(|(_, s)| s.is_push() && !s.is_closed()).count();
        if live_pushes >= self.config.max_concurrent_pushed_streams {
            return Err(ErrorCode::RefusedStream);
        }
        Ok(url)
    }

    // ----- Introspection -----

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            host: self.key.destination.to_string(),
            proxy: self.key.proxy.as_ref().map(ToString::to_string),
            state: self.lifecycle.state(),
            negotiated_protocol: self.ssl_info.negotiated_protocol.clone(),
            active_streams: self.streams.active_count(),
            unclaimed_pushed_streams: self.pushes.len(),
            created_streams: self
                .streams
                .iter()
                .filter(|(_, s)| s.id.is_none() && !s.is_closed())
                .count(),
            pending_requests: self.pending_request_count(),
            send_window: self.flow.send_window(),
            recv_window: self.flow.recv_window(),
            max_concurrent_streams: self.peer.max_concurrent_streams,
            frames_received: self.frames_received,
            is_draining: !self.lifecycle.is_available(),
            is_going_away: self.lifecycle.is_going_away(),
            goaway_code: self.lifecycle.goaway_code().map(ErrorCode::as_u32),
            error_on_close: self.lifecycle.error_on_close().map(|e| e.as_i32()),
        }
    }

    pub fn info_as_value(&self) -> serde_json::Value {
        serde_json::to_value(self.info()).unwrap_or(serde_json::Value::Null)
    }
}

fn failure_of(stream: &Stream, error: NetError) -> RequestFailure {
    RequestFailure::new(error, stream.request_sent, stream.response_headers.is_some())
}

/// Whether the head item of a stream may be written now.
fn readiness(
    streams: &StreamTable,
    flow: &FlowController,
    handshake_confirmed: bool,
    write: &QueuedWrite<StreamKey>,
) -> Readiness {
    let Some(stream) = streams.get(write.stream) else {
        // Stale entry; let it be dequeued and dropped.
        return Readiness::Ready { wire_id: None };
    };
    if stream.failure.is_some() || stream.is_closed() {
        return Readiness::Ready { wire_id: stream.id };
    }
    match &write.item {
        WriteItem::Headers { .. } => {
            if stream.id.is_none() && stream.requires_confirmation && !handshake_confirmed {
                Readiness::Blocked
            } else {
                Readiness::Ready { wire_id: stream.id }
            }
        }
        WriteItem::Data { data, .. } => match stream.id {
            Some(id) if data.is_empty() || flow.sendable(&stream.windows) > 0 => {
                Readiness::Ready { wire_id: Some(id) }
            }
            _ => Readiness::Blocked,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spdy::frame::flags;
    use crate::spdy::settings::H2Settings;
    use std::time::Duration;

    /// Server side of a connection, built from the same codec.
    struct Peer {
        decoder: FrameDecoder,
        codec: HpackCodec,
        buf: BytesMut,
        seen_preface: bool,
        partial: Option<(u32, BytesMut)>,
        /// Decoded request header blocks by stream id, in arrival order.
        requests: Vec<(u32, HeaderBlock)>,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE),
                codec: HpackCodec::new(),
                buf: BytesMut::new(),
                seen_preface: false,
                partial: None,
                requests: Vec::new(),
            }
        }

        /// Everything the session has to write, decoded.
        fn drain(&mut self, session: &mut SpdySession) -> Vec<Frame> {
            while let Some(bytes) = session.next_write() {
                self.buf.extend_from_slice(&bytes);
            }
            if !self.seen_preface {
                assert!(self.buf.starts_with(CONNECTION_PREFACE));
                let _ = self.buf.split_to(CONNECTION_PREFACE.len());
                self.seen_preface = true;
            }
            let mut frames = Vec::new();
            while let Some(frame) = self.decoder.decode(&mut self.buf).unwrap() {
                match &frame {
                    Frame::Headers { stream_id, block, end_headers, .. } => {
                        if *end_headers {
                            let headers = self.codec.decode(block).unwrap();
                            self.requests.push((*stream_id, headers));
                        } else {
                            self.partial = Some((*stream_id, BytesMut::from(&block[..])));
                        }
                    }
                    Frame::Continuation { block, end_headers, .. } => {
                        let (id, mut acc) = self.partial.take().unwrap();
                        acc.extend_from_slice(block);
                        if *end_headers {
                            let headers = self.codec.decode(&acc).unwrap();
                            self.requests.push((id, headers));
                        } else {
                            self.partial = Some((id, acc));
                        }
                    }
                    _ => {}
                }
                frames.push(frame);
            }
            frames
        }

        fn headers(&mut self, stream_id: u32, block: &HeaderBlock, end_stream: bool) -> Bytes {
            let encoded = self.codec.encode(block);
            let mut dst = BytesMut::new();
            encode_header_block(
                &mut dst,
                stream_id,
                encoded,
                end_stream,
                None,
                DEFAULT_MAX_FRAME_SIZE,
            );
            dst.freeze()
        }

        fn push_promise(&mut self, stream_id: u32, promised_id: u32, block: &HeaderBlock) -> Bytes {
            let encoded = self.codec.encode(block);
            Frame::PushPromise { stream_id, promised_id, block: encoded, end_headers: true }
                .to_bytes()
        }
    }

    fn status(code: &str) -> HeaderBlock {
        let mut block = HeaderBlock::new();
        block.append(":status", code);
        block
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn new_session() -> SpdySession {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        SpdySession::new(key, SessionConfig::default(), SslInfo::h2(&["example.com"]), true)
    }

    fn get(path: &str) -> StreamRequest {
        StreamRequest::for_url(&Method::GET, &url(&format!("https://example.com{}", path))).unwrap()
    }

    fn settings(values: Vec<(SettingsId, u32)>) -> Bytes {
        Frame::Settings { ack: false, values }.to_bytes()
    }

    fn send_get(session: &mut SpdySession, peer: &mut Peer, path: &str) -> (StreamKey, u32) {
        let key = session.open_stream(get(path)).unwrap();
        session.write_headers(key, true).unwrap();
        peer.drain(session);
        let id = session.stream(key).unwrap().id().unwrap();
        (key, id)
    }

    fn read_all(session: &mut SpdySession, key: StreamKey) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match session.read(key).unwrap() {
                ReadResult::Data(chunk) => body.extend_from_slice(&chunk),
                ReadResult::EndOfStream => return body,
                ReadResult::Pending => panic!("body incomplete"),
            }
        }
    }

    #[test]
    fn test_startup_frames() {
        let mut session = new_session();
        let mut peer = Peer::new();
        let frames = peer.drain(&mut session);

        assert!(matches!(&frames[0], Frame::Settings { ack: false, .. }));
        let expected = SessionConfig::default().session_max_recv_window_size as u32 - 65535;
        assert_eq!(frames[1], Frame::WindowUpdate { stream_id: 0, increment: expected });
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_ids_follow_wire_order_not_open_order() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);

        let low = session.open_stream(get("/low").priority(RequestPriority::Low)).unwrap();
        let high = session.open_stream(get("/high").priority(RequestPriority::Highest)).unwrap();
        session.write_headers(low, true).unwrap();
        session.write_headers(high, true).unwrap();
        peer.drain(&mut session);

        assert_eq!(session.stream(high).unwrap().id(), Some(1));
        assert_eq!(session.stream(low).unwrap().id(), Some(3));
        assert_eq!(peer.requests[0].1.path(), Some("/high"));
        assert_eq!(peer.requests[1].1.path(), Some("/low"));
    }

    #[test]
    fn test_set_priority_reorders_unsent_frames() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);

        let a = session.open_stream(get("/a").priority(RequestPriority::Medium)).unwrap();
        let b = session.open_stream(get("/b").priority(RequestPriority::Medium)).unwrap();
        session.write_headers(a, true).unwrap();
        session.write_headers(b, true).unwrap();
        session.set_priority(b, RequestPriority::Highest).unwrap();
        peer.drain(&mut session);

        assert_eq!(peer.requests[0].1.path(), Some("/b"));
        assert_eq!(session.stream(b).unwrap().id(), Some(1));
    }

    #[test]
    fn test_set_priority_on_sent_stream_sends_priority_frame() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.set_priority(key, RequestPriority::Highest).unwrap();
        let frames = peer.drain(&mut session);
        assert!(frames
            .iter()
            .any(|f| matches!(
                    f,
                    Frame::Priority { stream_id, spec } if *stream_id == id && spec.weight == 256
                )));
    }

    #[test]
    fn test_simple_get() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/index.html");

        assert_eq!(peer.requests[0].1.method(), Some("GET"));
        assert_eq!(session.stream_load_state(key), LoadState::WaitingForResponse);
        assert_eq!(session.read_response_headers(key).unwrap(), None);
        assert_eq!(session.read(key).unwrap(), ReadResult::Pending);

        let response = peer.headers(id, &status("200"), false);
        session.on_read(&response).unwrap();
        session.on_read(&Frame::data(id, Bytes::from_static(b"hello"), true).to_bytes()).unwrap();

        let headers = session.read_response_headers(key).unwrap().unwrap();
        assert_eq!(headers.status(), Some(200));
        assert_eq!(read_all(&mut session, key), b"hello");
        assert!(session.stream(key).unwrap().is_closed());
        assert_eq!(session.active_streams(), 0);

        session.release_stream(key);
        assert!(session.stream(key).is_none());
        assert_eq!(session.read(key), Err(RequestFailure::unsent(NetError::Http2StreamClosed)));
    }

    #[test]
    fn test_interim_response_skipped() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.headers(id, &status("103"), false)).unwrap();
        assert_eq!(session.read_response_headers(key).unwrap(), None);
        session.on_read(&peer.headers(id, &status("204"), true)).unwrap();
        assert_eq!(session.read_response_headers(key).unwrap().unwrap().status(), Some(204));
    }

    #[test]
    fn test_trailers() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        session.on_read(&Frame::data(id, Bytes::from_static(b"body"), false).to_bytes()).unwrap();
        let mut trailers = HeaderBlock::new();
        trailers.append("grpc-status", "0");
        session.on_read(&peer.headers(id, &trailers, true)).unwrap();

        assert_eq!(read_all(&mut session, key), b"body");
        assert_eq!(session.read_trailers(key).unwrap().get_str("grpc-status"), Some("0"));
    }

    #[test]
    fn test_second_header_block_without_fin_resets_stream() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();

        let err = session.read(key).unwrap_err();
        assert_eq!(err.error, NetError::Http2ProtocolError);
        assert!(err.response_started);
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::ProtocolError };
        assert!(frames.contains(&reset));
        assert!(session.is_available());
    }

    #[test]
    fn test_data_after_trailers_is_session_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);

        // Request body still open, so the stream stays tracked after trailers.
        let key = session.open_stream(get("/upload")).unwrap();
        session.write_headers(key, false).unwrap();
        peer.drain(&mut session);
        let id = session.stream(key).unwrap().id().unwrap();

        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        let mut trailers = HeaderBlock::new();
        trailers.append("x-done", "1");
        session.on_read(&peer.headers(id, &trailers, true)).unwrap();

        let err = session.on_read(&Frame::data(id, Bytes::from_static(b"late"), false).to_bytes());
        assert_eq!(err, Err(NetError::Http2ProtocolError));
        assert!(session.is_closed());
        let frames = peer.drain(&mut session);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::GoAway { error_code: ErrorCode::ProtocolError, .. })));
    }

    #[test]
    fn test_data_chunked_by_flow_control() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        session.on_read(&settings(vec![(SettingsId::InitialWindowSize, 10)])).unwrap();

        let key = session.open_stream(get("/upload").has_body(true)).unwrap();
        session.write_headers(key, false).unwrap();
        session.write_data(key, Bytes::from(vec![7u8; 25]), true).unwrap();
        let frames = peer.drain(&mut session);
        let id = session.stream(key).unwrap().id().unwrap();

        let data: Vec<&Frame> = frames.iter().filter(|f| matches!(f, Frame::Data { .. })).collect();
        assert_eq!(data.len(), 1);
        assert!(matches!(data[0], Frame::Data { data, end_stream: false, .. } if data.len() == 10));
        assert_eq!(session.stream(key).unwrap().send_window(), 0);
        assert!(session.has_unsent_writes(key));

        session.on_read(&Frame::WindowUpdate { stream_id: id, increment: 100 }.to_bytes()).unwrap();
        let frames = peer.drain(&mut session);
        let rest: Vec<&Frame> = frames.iter().filter(|f| matches!(f, Frame::Data { .. })).collect();
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0], Frame::Data { data, end_stream: true, .. } if data.len() == 15));
        assert!(!session.has_unsent_writes(key));
    }

    #[test]
    fn test_settings_decrease_makes_window_negative() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);

        let key = session.open_stream(get("/upload").has_body(true)).unwrap();
        session.write_headers(key, false).unwrap();
        session.write_data(key, Bytes::from(vec![0u8; 1000]), false).unwrap();
        peer.drain(&mut session);

        session.on_read(&settings(vec![(SettingsId::InitialWindowSize, 100)])).unwrap();
        assert_eq!(session.stream(key).unwrap().send_window(), 100 - 1000);

        session.write_data(key, Bytes::from_static(b"more"), true).unwrap();
        let frames = peer.drain(&mut session);
        assert!(!frames.iter().any(|f| matches!(f, Frame::Data { .. })));
        assert!(session.is_available());
    }

    #[test]
    fn test_stream_window_update_overflow_resets_stream() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        let update = Frame::WindowUpdate { stream_id: id, increment: i32::MAX as u32 };
        session.on_read(&update.to_bytes()).unwrap();
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::FlowControlError };
        assert!(frames.contains(&reset));
        assert_eq!(session.read(key).unwrap_err().error, NetError::Http2FlowControlError);
        assert!(session.is_available());
    }

    #[test]
    fn test_settings_overflow_is_session_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        let update = Frame::WindowUpdate { stream_id: id, increment: i32::MAX as u32 - 65535 };
        session.on_read(&update.to_bytes()).unwrap();
        let err = session.on_read(&settings(vec![(SettingsId::InitialWindowSize, 65536)]));
        assert_eq!(err, Err(NetError::Http2FlowControlError));
        assert!(session.is_closed());
        assert_eq!(session.read(key).unwrap_err().error, NetError::Http2FlowControlError);
        let frames = peer.drain(&mut session);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::GoAway { error_code: ErrorCode::FlowControlError, .. })));
    }

    #[test]
    fn test_session_window_update_overflow_is_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let update = Frame::WindowUpdate { stream_id: 0, increment: i32::MAX as u32 };
        let err = session.on_read(&update.to_bytes());
        assert_eq!(err, Err(NetError::Http2FlowControlError));
        assert_eq!(session.error_on_close(), Some(NetError::Http2FlowControlError));
    }

    #[test]
    fn test_receive_window_enforced_per_stream() {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        let config = SessionConfig::default().stream_max_recv_window_size(16);
        let mut session = SpdySession::new(key, config, SslInfo::h2(&["example.com"]), true);
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        session.on_read(&Frame::data(id, Bytes::from(vec![1u8; 17]), false).to_bytes()).unwrap();

        assert_eq!(session.read(key).unwrap_err().error, NetError::Http2FlowControlError);
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::FlowControlError };
        assert!(frames.contains(&reset));
        assert!(session.is_available());
        assert!(session.stream(key).unwrap().recv_window() >= 0);
    }

    #[test]
    fn test_window_update_after_consumption() {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        let config = SessionConfig::default().stream_max_recv_window_size(100);
        let mut session = SpdySession::new(key, config, SslInfo::h2(&["example.com"]), true);
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        session.on_read(&Frame::data(id, Bytes::from(vec![1u8; 40]), false).to_bytes()).unwrap();
        session.read(key).unwrap();
        assert!(!peer.drain(&mut session).iter().any(|f| matches!(f, Frame::WindowUpdate { .. })));

        session.on_read(&Frame::data(id, Bytes::from(vec![1u8; 10]), false).to_bytes()).unwrap();
        session.read(key).unwrap();
        let frames = peer.drain(&mut session);
        assert!(frames.contains(&Frame::WindowUpdate { stream_id: id, increment: 50 }));
    }

    #[test]
    fn test_goaway_no_error() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (first, id1) = send_get(&mut session, &mut peer, "/1");
        let (second, id3) = send_get(&mut session, &mut peer, "/3");
        let unsent = session.open_stream(get("/unsent")).unwrap();
        let queued = session.request_stream(get("/q"));
        assert_eq!((id1, id3), (1, 3));

        let goaway = Frame::GoAway {
            last_stream_id: 1,
            error_code: ErrorCode::NoError,
            debug_data: Bytes::new(),
        };
        session.on_read(&goaway.to_bytes()).unwrap();
        assert!(!session.is_available());
        let info = session.info();
        assert!(info.is_going_away);
        assert_eq!(info.goaway_code, Some(0));
        assert_eq!(session.open_stream(get("/new")).unwrap_err(), NetError::Http2SessionGoingAway);

        let refused = session.read(second).unwrap_err();
        assert_eq!(refused.error, NetError::Http2ServerRefusedStream);
        assert!(refused.is_safe_to_retry());
        assert_eq!(session.read(unsent).unwrap_err().error, NetError::Http2SessionGoingAway);
        drop(queued);

        // Stream 1 still completes.
        session.on_read(&peer.headers(1, &status("200"), true)).unwrap();
        assert_eq!(session.read_response_headers(first).unwrap().unwrap().status(), Some(200));
        assert_eq!(session.state(), SessionState::Drained);
    }

    #[test]
    fn test_goaway_http11_required_drains() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, _) = send_get(&mut session, &mut peer, "/");
        let goaway = Frame::GoAway {
            last_stream_id: 1,
            error_code: ErrorCode::Http11Required,
            debug_data: Bytes::new(),
        };
        session.on_read(&goaway.to_bytes()).unwrap();
        assert_eq!(session.read(key).unwrap_err().error, NetError::Http11Required);
        assert!(session.is_closed());
        assert!(!peer.drain(&mut session).iter().any(|f| matches!(f, Frame::GoAway { .. })));
    }

    #[test]
    fn test_rst_stream_codes() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (a, id_a) = send_get(&mut session, &mut peer, "/a");
        let (b, id_b) = send_get(&mut session, &mut peer, "/b");

        let reset_a = Frame::RstStream { stream_id: id_a, error_code: ErrorCode::Http11Required };
        session.on_read(&reset_a.to_bytes()).unwrap();
        let reset_b = Frame::RstStream { stream_id: id_b, error_code: ErrorCode::RefusedStream };
        session.on_read(&reset_b.to_bytes()).unwrap();
        assert_eq!(session.read(a).unwrap_err().error, NetError::Http11Required);
        assert_eq!(session.read(b).unwrap_err().error, NetError::Http2ServerRefusedStream);
    }

    #[test]
    fn test_rst_no_error_after_complete_response_is_clean() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let key = session.open_stream(get("/upload").has_body(true)).unwrap();
        session.write_headers(key, false).unwrap();
        peer.drain(&mut session);
        let id = session.stream(key).unwrap().id().unwrap();

        session.on_read(&peer.headers(id, &status("200"), true)).unwrap();
        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::NoError };
        session.on_read(&reset.to_bytes()).unwrap();
        assert!(session.read_response_headers(key).unwrap().is_some());
        assert_eq!(session.read(key).unwrap(), ReadResult::EndOfStream);
    }

    #[test]
    fn test_tunnel_gets_proxy_http11_required() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let mut headers = HeaderBlock::new();
        headers.append(":method", "CONNECT");
        headers.append(":authority", "origin.example:443");
        let key = session.open_stream(StreamRequest::new(headers)).unwrap();
        session.write_headers(key, false).unwrap();
        peer.drain(&mut session);
        let id = session.stream(key).unwrap().id().unwrap();

        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::Http11Required };
        session.on_read(&reset.to_bytes()).unwrap();
        assert_eq!(session.read(key).unwrap_err().error, NetError::ProxyHttp11Required);
    }

    #[test]
    fn test_max_concurrent_streams_queues_requests() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        session.on_read(&settings(vec![(SettingsId::MaxConcurrentStreams, 1)])).unwrap();

        let (first, id) = send_get(&mut session, &mut peer, "/1");
        let err = session.open_stream(get("/x")).unwrap_err();
        assert_eq!(err, NetError::Http2TooManyConcurrentStreams);
        let mut low = session.request_stream(get("/low").priority(RequestPriority::Low));
        let mut high = session.request_stream(get("/high").priority(RequestPriority::Highest));
        assert!(low.try_recv().is_err());
        assert_eq!(session.pending_request_count(), 2);

        session.on_read(&peer.headers(id, &status("200"), true)).unwrap();
        assert!(session.stream(first).unwrap().is_closed());
        let granted = high.try_recv().unwrap().unwrap();
        assert!(low.try_recv().is_err());
        assert_eq!(session.pending_request_count(), 1);

        session.release_stream(granted);
        assert!(low.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_raising_limit_serves_queue() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        session.on_read(&settings(vec![(SettingsId::MaxConcurrentStreams, 0)])).unwrap();
        let mut waiting = session.request_stream(get("/"));
        assert!(waiting.try_recv().is_err());
        session.on_read(&settings(vec![(SettingsId::MaxConcurrentStreams, 10)])).unwrap();
        assert!(waiting.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_websocket_needs_connect_protocol() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let request = StreamRequest::websocket(&url("wss://example.com/chat")).unwrap();
        assert_eq!(session.open_stream(request.clone()).unwrap_err(), NetError::NotImplemented);

        session.on_read(&settings(vec![(SettingsId::EnableConnectProtocol, 1)])).unwrap();
        assert!(session.supports_websocket());
        let key = session.open_stream(request).unwrap();
        assert_eq!(session.stream(key).unwrap().kind(), StreamKind::WebSocket);

        let err = session.on_read(&settings(vec![(SettingsId::EnableConnectProtocol, 0)]));
        assert_eq!(err, Err(NetError::Http2ProtocolError));
    }

    #[test]
    fn test_bad_max_frame_size_is_protocol_error() {
        let mut session = new_session();
        let err = session.on_read(&settings(vec![(SettingsId::MaxFrameSize, 100)]));
        assert_eq!(err, Err(NetError::Http2ProtocolError));
    }

    #[test]
    fn test_settings_and_ping_are_acked() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        session.on_read(&settings(vec![(SettingsId::Unknown(0x99), 5)])).unwrap();
        session.on_read(&Frame::Ping { ack: false, payload: *b"12345678" }.to_bytes()).unwrap();

        let frames = peer.drain(&mut session);
        assert!(frames.contains(&Frame::Settings { ack: true, values: Vec::new() }));
        assert!(frames.contains(&Frame::Ping { ack: true, payload: *b"12345678" }));

        session.send_ping(*b"abcdefgh");
        assert_eq!(session.pings_in_flight(), 1);
        session.on_read(&Frame::Ping { ack: true, payload: *b"abcdefgh" }.to_bytes()).unwrap();
        assert_eq!(session.pings_in_flight(), 0);
    }

    #[test]
    fn test_early_data_holds_unsafe_requests() {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        let mut session =
            SpdySession::new(key, SessionConfig::default(), SslInfo::h2(&["example.com"]), false);
        let mut peer = Peer::new();
        peer.drain(&mut session);

        let post = StreamRequest::for_url(&Method::POST, &url("https://example.com/form"))
            .unwrap()
            .has_body(true);
        let post = session.open_stream(post).unwrap();
        let get_key = session.open_stream(get("/safe")).unwrap();
        session.write_headers(post, false).unwrap();
        session.write_headers(get_key, true).unwrap();
        assert!(session.needs_handshake_confirmation(post));
        assert!(!session.needs_handshake_confirmation(get_key));

        peer.drain(&mut session);
        assert_eq!(peer.requests.len(), 1);
        assert_eq!(peer.requests[0].1.path(), Some("/safe"));

        session.on_handshake_confirmed();
        peer.drain(&mut session);
        assert_eq!(peer.requests.len(), 2);
        assert_eq!(peer.requests[1].1.method(), Some("POST"));
        assert_eq!(session.stream(post).unwrap().id(), Some(3));
    }

    #[test]
    fn test_continuation_frames_are_joined() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");

        let mut block = status("200");
        block.append("x-big", "v".repeat(40_000));
        let encoded = peer.codec.encode(&block);
        let mut dst = BytesMut::new();
        encode_header_block(&mut dst, id, encoded, true, None, DEFAULT_MAX_FRAME_SIZE);
        session.on_read(&dst).unwrap();

        let headers = session.read_response_headers(key).unwrap().unwrap();
        assert_eq!(headers.get("x-big").map(|v| v.len()), Some(40_000));
    }

    #[test]
    fn test_interleaved_frame_during_continuation_is_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");

        let encoded = peer.codec.encode(&status("200"));
        let start = Frame::Headers {
            stream_id: id,
            block: encoded,
            end_stream: false,
            end_headers: false,
            priority: None,
        };
        session.on_read(&start.to_bytes()).unwrap();
        let err = session.on_read(&Frame::Ping { ack: false, payload: [0; 8] }.to_bytes());
        assert_eq!(err, Err(NetError::Http2ProtocolError));
    }

    #[test]
    fn test_hpack_garbage_is_compression_error() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        let frame = Frame::Headers {
            stream_id: id,
            block: Bytes::from_static(&[0xff, 0xff, 0xff, 0x7f]),
            end_stream: true,
            end_headers: true,
            priority: None,
        };
        assert_eq!(session.on_read(&frame.to_bytes()), Err(NetError::Http2CompressionError));
    }

    #[test]
    fn test_headers_on_unopened_stream_is_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let err = session.on_read(&peer.headers(5, &status("200"), true));
        assert_eq!(err, Err(NetError::Http2ProtocolError));
    }

    #[test]
    fn test_self_dependent_priority_resets_stream() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");
        let spec = PrioritySpec { dependency: id, weight: 16, exclusive: false };
        session.on_read(&Frame::Priority { stream_id: id, spec }.to_bytes()).unwrap();
        assert_eq!(session.read(key).unwrap_err().error, NetError::Http2ProtocolError);
    }

    #[test]
    fn test_release_open_stream_sends_cancel() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");
        session.release_stream(key);
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: id, error_code: ErrorCode::Cancel };
        assert!(frames.contains(&reset));
        assert!(session.stream(key).is_none());
        assert_eq!(session.active_streams(), 0);
    }

    fn promise(path: &str) -> HeaderBlock {
        HeaderBlock::request(&Method::GET, &url(&format!("https://example.com{}", path))).unwrap()
    }

    #[test]
    fn test_push_served_without_new_request() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (main, id) = send_get(&mut session, &mut peer, "/");

        session.on_read(&peer.push_promise(id, 2, &promise("/a.dat"))).unwrap();
        assert_eq!(session.unclaimed_pushed_streams(), 1);
        let frames = peer.drain(&mut session);
        assert!(frames.iter().any(|f| matches!(f, Frame::Priority { stream_id: 2, .. })));

        session.on_read(&peer.headers(2, &status("200"), false)).unwrap();
        session.on_read(&Frame::data(2, Bytes::from_static(b"pushed"), true).to_bytes()).unwrap();
        session.on_read(&peer.headers(id, &status("200"), true)).unwrap();
        assert!(session.read_response_headers(main).unwrap().is_some());

        let requests_before = peer.requests.len();
        let claimed = session.claim_pushed_stream(&get("/a.dat")).unwrap();
        assert_eq!(session.unclaimed_pushed_streams(), 0);
        assert_eq!(session.read_response_headers(claimed).unwrap().unwrap().status(), Some(200));
        assert_eq!(read_all(&mut session, claimed), b"pushed");
        peer.drain(&mut session);
        assert_eq!(peer.requests.len(), requests_before);
    }

    #[test]
    fn test_push_vary_cookie() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");

        let mut promised = promise("/p");
        promised.append("cookie", "session=1");
        session.on_read(&peer.push_promise(id, 2, &promised)).unwrap();
        let mut response = status("200");
        response.append("vary", "cookie");
        session.on_read(&peer.headers(2, &response, false)).unwrap();

        let mut other = get("/p");
        other.headers.append("cookie", "session=2");
        assert!(session.claim_pushed_stream(&other).is_none());
        assert_eq!(session.unclaimed_pushed_streams(), 1);

        let mut same = get("/p");
        same.headers.append("cookie", "session=1");
        assert!(session.claim_pushed_stream(&same).is_some());
    }

    #[test]
    fn test_claimed_push_rechecked_when_headers_arrive() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();

        let mut request = get("/p");
        request.headers.append("cookie", "a=1");
        let claimed = session.claim_pushed_stream(&request).unwrap();

        let mut response = status("200");
        response.append("vary", "cookie");
        session.on_read(&peer.headers(2, &response, false)).unwrap();
        let err = session.read(claimed).unwrap_err();
        assert_eq!(err.error, NetError::Http2PushedResponseDoesNotMatch);
        let frames = peer.drain(&mut session);
        assert!(frames.contains(&Frame::RstStream { stream_id: 2, error_code: ErrorCode::Cancel }));
    }

    #[test]
    fn test_claimed_push_reset_by_server() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();
        let claimed = session.claim_pushed_stream(&get("/p")).unwrap();
        let reset = Frame::RstStream { stream_id: 2, error_code: ErrorCode::Cancel };
        session.on_read(&reset.to_bytes()).unwrap();
        let failure = session.read(claimed).unwrap_err();
        assert_eq!(failure.error, NetError::Http2ClaimedPushedStreamResetByServer);
    }

    #[test]
    fn test_unclaimed_push_reset_is_discarded() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();
        let reset = Frame::RstStream { stream_id: 2, error_code: ErrorCode::Cancel };
        session.on_read(&reset.to_bytes()).unwrap();
        assert_eq!(session.unclaimed_pushed_streams(), 0);
        assert!(session.claim_pushed_stream(&get("/p")).is_none());
    }

    #[test]
    fn test_push_rejections() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");

        let mut plain = HeaderBlock::request(&Method::GET, &url("http://example.com/x")).unwrap();
        session.on_read(&peer.push_promise(id, 2, &plain)).unwrap();
        plain = HeaderBlock::request(&Method::POST, &url("https://example.com/x")).unwrap();
        session.on_read(&peer.push_promise(id, 4, &plain)).unwrap();
        let cross = HeaderBlock::request(&Method::GET, &url("https://evil.test/x")).unwrap();
        session.on_read(&peer.push_promise(id, 6, &cross)).unwrap();
        session.on_read(&peer.push_promise(id, 8, &promise("/dup"))).unwrap();
        session.on_read(&peer.push_promise(id, 10, &promise("/dup"))).unwrap();

        let frames = peer.drain(&mut session);
        for stream_id in [2, 4, 6, 10] {
            assert!(
                frames.contains(&Frame::RstStream {
                    stream_id,
                    error_code: ErrorCode::RefusedStream
                }),
                "push {} should be refused",
                stream_id
            );
        }
        assert_eq!(session.unclaimed_pushed_streams(), 1);
        assert!(session.is_available());
    }

    #[test]
    fn test_push_on_closed_stream_is_protocol_reset() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.headers(id, &status("200"), true)).unwrap();

        session.on_read(&peer.push_promise(id, 2, &promise("/late"))).unwrap();
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: 2, error_code: ErrorCode::ProtocolError };
        assert!(frames.contains(&reset));
    }

    #[test]
    fn test_push_disabled_in_settings() {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        let config = SessionConfig::default().settings(H2Settings::without_push());
        let mut session = SpdySession::new(key, config, SslInfo::h2(&["example.com"]), true);
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();
        let frames = peer.drain(&mut session);
        let reset = Frame::RstStream { stream_id: 2, error_code: ErrorCode::RefusedStream };
        assert!(frames.contains(&reset));
    }

    #[test]
    fn test_bad_push_ids_are_fatal() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 4, &promise("/a"))).unwrap();
        let err = session.on_read(&peer.push_promise(id, 2, &promise("/b")));
        assert_eq!(err, Err(NetError::Http2ProtocolError));

        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        let err = session.on_read(&peer.push_promise(id, 3, &promise("/odd")));
        assert_eq!(err, Err(NetError::Http2ProtocolError));
    }

    #[test]
    fn test_unclaimed_push_expires() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();

        assert_eq!(session.expire_unclaimed_pushes(Instant::now()), 0);
        let timeout = session.config().unclaimed_push_timeout;
        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert_eq!(session.expire_unclaimed_pushes(later), 1);
        assert_eq!(session.unclaimed_pushed_streams(), 0);
        let frames = peer.drain(&mut session);
        assert!(frames.contains(&Frame::RstStream { stream_id: 2, error_code: ErrorCode::Cancel }));
    }

    #[test]
    fn test_padded_data_returns_padding_credit() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();

        // DATA with PADDED flag: pad length 4, body "ab", 4 bytes padding.
        let mut raw = BytesMut::new();
        raw.extend_from_slice(&[0, 0, 7, 0x0, flags::PADDED | flags::END_STREAM]);
        raw.extend_from_slice(&id.to_be_bytes());
        raw.extend_from_slice(&[4, b'a', b'b', 0, 0, 0, 0]);
        session.on_read(&raw).unwrap();

        assert_eq!(read_all(&mut session, key), b"ab");
        let recv = session.recv_window();
        assert!(recv <= session.config().session_max_recv_window_size as i64);
    }

    fn session_window_updates(frames: &[Frame]) -> u32 {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::WindowUpdate { stream_id: 0, increment } => Some(*increment),
                _ => None,
            })
            .sum()
    }

    fn small_window_session() -> SpdySession {
        let key = SpdySessionKey::from_url(&url("https://example.com/")).unwrap();
        let config = SessionConfig::default().session_max_recv_window_size(65_535);
        SpdySession::new(key, config, SslInfo::h2(&["example.com"]), true)
    }

    #[test]
    fn test_released_streams_return_unread_data() {
        let mut session = small_window_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);

        let mut keys = Vec::new();
        for path in ["/a", "/b", "/c", "/d"] {
            let (key, id) = send_get(&mut session, &mut peer, path);
            session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
            let data = Frame::data(id, Bytes::from(vec![0u8; 16_000]), false);
            session.on_read(&data.to_bytes()).unwrap();
            keys.push(key);
        }
        assert_eq!(session.recv_window(), 1_535);

        for key in keys {
            session.release_stream(key);
        }
        let frames = peer.drain(&mut session);
        assert_eq!(session_window_updates(&frames), 48_000);
        assert_eq!(session.recv_window(), 49_535);

        let (key, id) = send_get(&mut session, &mut peer, "/next");
        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        for _ in 0..2 {
            let data = Frame::data(id, Bytes::from(vec![1u8; 16_000]), false);
            session.on_read(&data.to_bytes()).unwrap();
        }
        assert!(session.is_available());
        assert!(matches!(session.read(key).unwrap(), ReadResult::Data(_)));
    }

    #[test]
    fn test_server_reset_returns_buffered_data() {
        let mut session = small_window_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.headers(id, &status("200"), false)).unwrap();
        for len in [16_000, 16_000, 8_000] {
            let data = Frame::data(id, Bytes::from(vec![0u8; len]), false);
            session.on_read(&data.to_bytes()).unwrap();
        }
        assert_eq!(session.recv_window(), 25_535);

        let rst = Frame::RstStream { stream_id: id, error_code: ErrorCode::InternalError };
        session.on_read(&rst.to_bytes()).unwrap();
        assert_eq!(session.read(key).unwrap_err().error, NetError::Http2ProtocolError);
        let frames = peer.drain(&mut session);
        assert_eq!(session_window_updates(&frames), 40_000);
        assert_eq!(session.recv_window(), 65_535);
    }

    #[test]
    fn test_expired_push_returns_buffered_data() {
        let mut session = small_window_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (_, id) = send_get(&mut session, &mut peer, "/");
        session.on_read(&peer.push_promise(id, 2, &promise("/p"))).unwrap();
        session.on_read(&peer.headers(2, &status("200"), false)).unwrap();
        for _ in 0..3 {
            let data = Frame::data(2, Bytes::from(vec![0u8; 12_000]), false);
            session.on_read(&data.to_bytes()).unwrap();
        }

        let timeout = session.config().unclaimed_push_timeout;
        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert_eq!(session.expire_unclaimed_pushes(later), 1);
        let frames = peer.drain(&mut session);
        assert_eq!(session_window_updates(&frames), 36_000);
        assert_eq!(session.recv_window(), 65_535);
    }

    #[test]
    fn test_write_after_reset_is_refused() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let key = session.open_stream(get("/upload").has_body(true)).unwrap();
        session.write_headers(key, false).unwrap();
        peer.drain(&mut session);
        let id = session.stream(key).unwrap().id().unwrap();

        let rst = Frame::RstStream { stream_id: id, error_code: ErrorCode::RefusedStream };
        session.on_read(&rst.to_bytes()).unwrap();
        let failure = session.write_data(key, Bytes::from_static(b"body"), true).unwrap_err();
        assert_eq!(failure.error, NetError::Http2ServerRefusedStream);
        assert!(failure.request_sent);

        session.release_stream(key);
        let failure = session.write_trailers(key, HeaderBlock::new()).unwrap_err();
        assert_eq!(failure.error, NetError::Http2StreamClosed);
        assert!(!failure.request_sent);
    }

    #[test]
    fn test_info_as_value() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        send_get(&mut session, &mut peer, "/");
        let value = session.info_as_value();
        assert_eq!(value["host"], "https://example.com:443");
        assert_eq!(value["active_streams"], 1);
        assert_eq!(value["is_draining"], false);
        assert_eq!(value["is_going_away"], false);
        assert!(value["goaway_code"].is_null());
        assert!(!session.has_pending_writes());
    }

    #[test]
    fn test_transport_close_fails_streams_without_goaway() {
        let mut session = new_session();
        let mut peer = Peer::new();
        peer.drain(&mut session);
        let (key, _) = send_get(&mut session, &mut peer, "/");
        session.on_transport_closed(NetError::ConnectionClosed);
        let err = session.read(key).unwrap_err();
        assert_eq!(err.error, NetError::ConnectionClosed);
        assert!(err.request_sent);
        assert!(peer.drain(&mut session).is_empty());
    }
}
