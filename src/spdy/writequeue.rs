//! Outbound frame scheduling.
//!
//! Based on Chromium's `SpdyWriteQueue`: one FIFO per `RequestPriority`, with
//! connection control frames ahead of everything. Within a lane the
//! [`PriorityTree`] arbitrates between streams that already have a wire id.
//! Items stay semantic (header lists, body bytes) until dequeued, so HPACK
//! state and stream ids follow the real wire order.

use crate::base::requestpriority::RequestPriority;
use crate::spdy::frame::Frame;
use crate::spdy::headers::HeaderBlock;
use crate::spdy::priority::PriorityTree;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};

/// Something a stream wants written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteItem {
    /// Request headers or trailers.
    Headers { block: HeaderBlock, end_stream: bool },
    /// Body bytes; may be split by flow control when dequeued.
    Data { data: Bytes, end_stream: bool },
}

#[derive(Debug, Clone)]
pub struct QueuedWrite<K> {
    pub stream: K,
    pub priority: RequestPriority,
    pub item: WriteItem,
    seq: u64,
}

/// Whether a stream's head-of-line item may be written now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Waiting on flow control, early data, or similar.
    Blocked,
    /// May go out; `wire_id` is `None` until the stream's HEADERS are sent.
    Ready { wire_id: Option<u32> },
}

/// What [`WriteQueue::pop`] hands back.
#[derive(Debug, Clone)]
pub enum Dequeued<K> {
    Control(Frame),
    Stream(QueuedWrite<K>),
}

#[derive(Debug)]
pub struct WriteQueue<K> {
    control: VecDeque<Frame>,
    lanes: [VecDeque<QueuedWrite<K>>; RequestPriority::COUNT],
    next_seq: u64,
}

impl<K> Default for WriteQueue<K> {
    fn default() -> Self {
        Self { control: VecDeque::new(), lanes: Default::default(), next_seq: 0 }
    }
}

impl<K: Copy + Eq + std::hash::Hash> WriteQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection-level frame (SETTINGS, PING, GOAWAY, WINDOW_UPDATE,
    /// RST_STREAM, PRIORITY). These go out before any stream frame.
    pub fn push_control(&mut self, frame: Frame) {
        self.control.push_back(frame);
    }

    /// Queue a stream item at the back of its priority lane.
    pub fn push(&mut self, stream: K, priority: RequestPriority, item: WriteItem) {
        let seq = self.bump();
        self.lanes[priority.lane()].push_back(QueuedWrite { stream, priority, item, seq });
    }

    /// Put back the unsent remainder of a dequeued item. It goes ahead of any
    /// later item of the same stream, otherwise to the back of the lane.
    pub fn requeue(&mut self, mut write: QueuedWrite<K>) {
        let lane_idx = write.priority.lane();
        match self.lanes[lane_idx].iter().position(|w| w.stream == write.stream) {
            Some(idx) => self.lanes[lane_idx].insert(idx, write),
            None => {
                write.seq = self.bump();
                self.lanes[lane_idx].push_back(write);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.lanes.iter().all(|l| l.is_empty())
    }

    pub fn len(&self) -> usize {
        self.control.len() + self.lanes.iter().map(|l| l.len()).sum::<usize>()
    }

    pub fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    pub fn has_writes_for_stream(&self, stream: K) -> bool {
        self.lanes.iter().flatten().any(|w| w.stream == stream)
    }

    /// Bytes of body data still queued for `stream`.
    pub fn pending_data_for_stream(&self, stream: K) -> usize {
        self.lanes
            .iter()
            .flatten()
            .filter(|w| w.stream == stream)
            .map(|w| match &w.item {
                WriteItem::Data { data, .. } => data.len(),
                WriteItem::Headers { .. } => 0,
            })
            .sum()
    }

    /// Take the next frame to serialize.
    ///
    /// `readiness` is asked about the first queued item of each stream only;
    /// a blocked item holds back everything queued after it for that stream.
    pub fn pop(
        &mut self,
        tree: &mut PriorityTree,
        mut readiness: impl FnMut(&QueuedWrite<K>) -> Readiness,
    ) -> Option<Dequeued<K>> {
        if let Some(frame) = self.control.pop_front() {
            return Some(Dequeued::Control(frame));
        }

        for lane_idx in 0..self.lanes.len() {
            let lane = &self.lanes[lane_idx];
            if lane.is_empty() {
                continue;
            }

            let mut seen: HashSet<K> = HashSet::new();
            let mut first_unactivated: Option<(usize, u64)> = None;
            let mut activated: Vec<(usize, u32, u64)> = Vec::new();
            for (idx, write) in lane.iter().enumerate() {
                if !seen.insert(write.stream) {
                    continue;
                }
                match readiness(write) {
                    Readiness::Blocked => {}
                    Readiness::Ready { wire_id: None } => {
                        if first_unactivated.is_none() {
                            first_unactivated = Some((idx, write.seq));
                        }
                    }
                    Readiness::Ready { wire_id: Some(id) } => activated.push((idx, id, write.seq)),
                }
            }

            let earliest_activated = activated.iter().map(|(_, _, seq)| *seq).min();
            let chosen = match (first_unactivated, earliest_activated) {
                (Some((idx, seq)), Some(other)) if seq < other => Some(idx),
                (Some((idx, _)), None) => Some(idx),
                (_, Some(_)) => {
                    let ready: HashSet<u32> = activated.iter().map(|(_, id, _)| *id).collect();
                    let picked = tree.pick(&ready);
                    picked
                        .and_then(|id| activated.iter().find(|(_, wid, _)| *wid == id))
                        .or_else(|| activated.iter().min_by_key(|(_, _, seq)| *seq))
                        .map(|(idx, _, _)| *idx)
                }
                (None, None) => None,
            };

            if let Some(idx) = chosen {
                return self.lanes[lane_idx].remove(idx).map(Dequeued::Stream);
            }
        }
        None
    }

    /// Move every queued item of `stream` to the back of `priority`'s lane,
    /// keeping their relative order.
    pub fn change_priority_of_writes_for_stream(&mut self, stream: K, priority: RequestPriority) {
        let mut moved = Vec::new();
        for lane in self.lanes.iter_mut() {
            let mut kept = VecDeque::with_capacity(lane.len());
            for write in lane.drain(..) {
                if write.stream == stream {
                    moved.push(write);
                } else {
                    kept.push_back(write);
                }
            }
            *lane = kept;
        }
        moved.sort_by_key(|w| w.seq);
        for mut write in moved {
            write.priority = priority;
            write.seq = self.bump();
            self.lanes[priority.lane()].push_back(write);
        }
    }

    /// Drop every queued item of `stream`.
    pub fn remove_writes_for_stream(&mut self, stream: K) {
        for lane in self.lanes.iter_mut() {
            lane.retain(|w| w.stream != stream);
        }
    }

    /// Drop queued items of every stream matching `predicate`.
    pub fn remove_writes_where(&mut self, mut predicate: impl FnMut(K) -> bool) {
        for lane in self.lanes.iter_mut() {
            lane.retain(|w| !predicate(w.stream));
        }
    }

    /// Drop all stream items, keeping queued control frames.
    pub fn clear_stream_writes(&mut self) {
        for lane in self.lanes.iter_mut() {
            lane.clear();
        }
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
