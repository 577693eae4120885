//! Streams and the arena that owns them.
//!
//! Callers never hold references into a session. They get a [`StreamKey`]
//! (slot index plus generation) and every operation re-validates it, since
//! the peer can close a stream at any time.

use crate::base::neterror::NetError;
use crate::base::requestpriority::RequestPriority;
use crate::spdy::flowcontrol::StreamWindows;
use crate::spdy::headers::HeaderBlock;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use url::Url;

/// Handle to a stream slot. Stale keys are detected by generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    index: u32,
    generation: u32,
}

/// RFC 7540 section 5.1 stream states (client view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Idle,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    /// Ordinary client request.
    Request,
    /// Extended CONNECT for a WebSocket (RFC 8441).
    WebSocket,
    /// CONNECT tunnel through an HTTP/2 proxy.
    Tunnel,
    /// Server push.
    Push,
}

/// Where the response side of a stream stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    /// No final response headers yet.
    AwaitingHeaders,
    /// Final headers received, no DATA yet.
    HeadersReceived,
    /// At least one DATA frame received.
    ReceivingData,
    /// Trailers received; nothing else may follow.
    TrailersReceived,
}

#[derive(Debug)]
pub struct Stream {
    pub(crate) id: Option<u32>,
    pub(crate) state: StreamState,
    pub(crate) kind: StreamKind,
    pub(crate) priority: RequestPriority,
    pub(crate) windows: StreamWindows,
    pub(crate) url: Option<Url>,
    pub(crate) request_headers: HeaderBlock,
    pub(crate) response_headers: Option<HeaderBlock>,
    pub(crate) trailers: Option<HeaderBlock>,
    pub(crate) phase: ResponsePhase,
    pub(crate) recv_buffer: VecDeque<Bytes>,
    pub(crate) buffered_bytes: usize,
    pub(crate) failure: Option<NetError>,
    /// HEADERS have been serialized.
    pub(crate) request_sent: bool,
    /// HEADERS have been handed to the write queue.
    pub(crate) headers_queued: bool,
    /// HEADERS must wait for a confirmed handshake.
    pub(crate) requires_confirmation: bool,
    /// Local end queued (not necessarily sent).
    pub(crate) local_fin_queued: bool,
    /// The owning handle is gone; free the slot once closed.
    pub(crate) released: bool,
    pub(crate) associated_id: Option<u32>,
    /// Request headers of whoever claimed this push.
    pub(crate) claimed_by: Option<HeaderBlock>,
    pub(crate) created_at: Instant,
    pub(crate) recv_bytes: u64,
    pub(crate) sent_bytes: u64,
}

impl Stream {
    pub(crate) fn new(
        kind: StreamKind,
        priority: RequestPriority,
        request_headers: HeaderBlock,
        windows: StreamWindows,
        now: Instant,
    ) -> Self {
        let url = request_headers.url().ok();
        Self {
            id: None,
            state: if kind == StreamKind::Push {
                StreamState::ReservedRemote
            } else {
                StreamState::Idle
            },
            kind,
            priority,
            windows,
            url,
            request_headers,
            response_headers: None,
            trailers: None,
            phase: ResponsePhase::AwaitingHeaders,
            recv_buffer: VecDeque::new(),
            buffered_bytes: 0,
            failure: None,
            request_sent: false,
            headers_queued: false,
            requires_confirmation: false,
            local_fin_queued: false,
            released: false,
            associated_id: None,
            claimed_by: None,
            created_at: now,
            recv_bytes: 0,
            sent_bytes: 0,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn priority(&self) -> RequestPriority {
        self.priority
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn send_window(&self) -> i64 {
        self.windows.send.size()
    }

    pub fn recv_window(&self) -> i64 {
        self.windows.recv.size()
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn is_push(&self) -> bool {
        self.kind == StreamKind::Push
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }

    pub fn response_headers(&self) -> Option<&HeaderBlock> {
        self.response_headers.as_ref()
    }

    pub fn trailers(&self) -> Option<&HeaderBlock> {
        self.trailers.as_ref()
    }

    /// Whether the remote side may still send frames.
    pub fn remote_open(&self) -> bool {
        matches!(
            self.state,
            StreamState::ReservedRemote | StreamState::Open | StreamState::HalfClosedLocal
        )
    }

    /// Whether we may still send frames.
    pub fn local_open(&self) -> bool {
        matches!(self.state, StreamState::Idle | StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Our HEADERS went out.
    pub(crate) fn on_headers_sent(&mut self, end_stream: bool) {
        self.request_sent = true;
        if self.state == StreamState::Idle {
            self.state = StreamState::Open;
        }
        if end_stream {
            self.on_local_fin();
        }
    }

    pub(crate) fn on_local_fin(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Response headers arrived on a reserved push stream. The client never
    /// sends on a push, so its local side is already finished.
    pub(crate) fn on_push_headers(&mut self) {
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
    }

    pub(crate) fn on_remote_fin(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        };
    }

    pub(crate) fn on_reset(&mut self) {
        self.state = StreamState::Closed;
    }

    pub(crate) fn push_data(&mut self, data: Bytes) {
        self.recv_bytes += data.len() as u64;
        if data.is_empty() {
            return;
        }
        self.buffered_bytes += data.len();
        self.recv_buffer.push_back(data);
    }

    pub(crate) fn pop_data(&mut self) -> Option<Bytes> {
        let chunk = self.recv_buffer.pop_front()?;
        self.buffered_bytes -= chunk.len();
        Some(chunk)
    }

    /// Drop everything buffered and report how many bytes that was.
    pub(crate) fn discard_data(&mut self) -> usize {
        self.recv_buffer.clear();
        std::mem::take(&mut self.buffered_bytes)
    }

    /// True once every byte the peer will ever send has been buffered.
    pub fn remote_finished(&self) -> bool {
        matches!(self.state, StreamState::HalfClosedRemote | StreamState::Closed)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    stream: Option<Stream>,
}

/// Arena of streams with a wire-id index.
#[derive(Debug, Default)]
pub struct StreamTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<u32, StreamKey>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream: Stream) -> StreamKey {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.stream = Some(stream);
            return StreamKey { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, stream: Some(stream) });
        StreamKey { index, generation: 0 }
    }

    pub fn get(&self, key: StreamKey) -> Option<&Stream> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.stream.as_ref()
    }

    pub fn get_mut(&mut self, key: StreamKey) -> Option<&mut Stream> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.stream.as_mut()
    }

    pub fn contains(&self, key: StreamKey) -> bool {
        self.get(key).is_some()
    }

    /// Free a slot. The key (and any copy of it) goes stale.
    pub fn remove(&mut self, key: StreamKey) -> Option<Stream> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let stream = slot.stream.take()?;
        if let Some(id) = stream.id {
            if self.by_id.get(&id) == Some(&key) {
                self.by_id.remove(&id);
            }
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(stream)
    }

    /// Bind a wire id to a stream.
    pub fn activate(&mut self, key: StreamKey, id: u32) {
        if let Some(stream) = self.get_mut(key) {
            stream.id = Some(id);
            self.by_id.insert(id, key);
        }
    }

    /// Forget the wire-id binding of a closed stream; the slot stays until
    /// its owner releases it.
    pub fn deactivate(&mut self, id: u32) {
        self.by_id.remove(&id);
    }

    pub fn key_for_id(&self, id: u32) -> Option<StreamKey> {
        self.by_id.get(&id).copied()
    }

    /// Streams currently bound to a wire id.
    pub fn active_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.stream.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.stream.is_some())
            .map(|(i, s)| StreamKey { index: i as u32, generation: s.generation })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamKey, &Stream)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.stream
                .as_ref()
                .map(|stream| (StreamKey { index: i as u32, generation: s.generation }, stream))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StreamKey, &mut Stream)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.stream.as_mut().map(|stream| (StreamKey { index: i as u32, generation }, stream))
        })
    }
}
