//! HTTP/2 frames and their wire codec.
//!
//! Frames are a closed enum over the kinds RFC 7540 defines, plus an
//! `Unknown` variant. Unknown frame types are parsed only far enough to skip
//! their payload and are always ignorable.

use crate::base::neterror::NetError;
use crate::spdy::protocol::{ErrorCode, SettingsId, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

const TYPE_DATA: u8 = 0x0;
const TYPE_HEADERS: u8 = 0x1;
const TYPE_PRIORITY: u8 = 0x2;
const TYPE_RST_STREAM: u8 = 0x3;
const TYPE_SETTINGS: u8 = 0x4;
const TYPE_PUSH_PROMISE: u8 = 0x5;
const TYPE_PING: u8 = 0x6;
const TYPE_GOAWAY: u8 = 0x7;
const TYPE_WINDOW_UPDATE: u8 = 0x8;
const TYPE_CONTINUATION: u8 = 0x9;

/// Stream dependency carried by HEADERS and PRIORITY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub dependency: u32,
    /// Weight in [1, 256].
    pub weight: u16,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Full payload length including padding; this is what flow control charges.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PrioritySpec>,
    },
    Priority {
        stream_id: u32,
        spec: PrioritySpec,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        values: Vec<(SettingsId, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        length: u32,
    },
}

/// Connection-fatal framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {length} bytes exceeds limit {limit}")]
    TooLarge { length: usize, limit: u32 },
    #[error("{0} frame has invalid length {1}")]
    BadLength(&'static str, usize),
    #[error("{0} frame on invalid stream {1}")]
    BadStreamId(&'static str, u32),
    #[error("invalid padding")]
    BadPadding,
}

impl FrameError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::TooLarge { .. } | FrameError::BadLength(..) => ErrorCode::FrameSizeError,
            FrameError::BadStreamId(..) | FrameError::BadPadding => ErrorCode::ProtocolError,
        }
    }

    pub fn net_error(&self) -> NetError {
        match self.error_code() {
            ErrorCode::FrameSizeError => NetError::Http2FrameSizeError,
            _ => NetError::Http2ProtocolError,
        }
    }
}

impl Frame {
    /// Stream the frame belongs to (0 for connection frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Convenience constructor for an unpadded DATA frame.
    pub fn data(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let flow_len = data.len() as u32;
        Frame::Data { stream_id, data, end_stream, flow_len }
    }

    /// Serialize the frame onto `dst`.
    ///
    /// Header blocks are written as-is; callers split oversized blocks with
    /// [`encode_header_block`].
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Data { stream_id, data, end_stream, .. } => {
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                encode_header(dst, data.len(), TYPE_DATA, f, *stream_id);
                dst.put_slice(data);
            }
            Frame::Headers { stream_id, block, end_stream, end_headers, priority } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                let extra = if priority.is_some() { 5 } else { 0 };
                if priority.is_some() {
                    f |= flags::PRIORITY;
                }
                encode_header(dst, block.len() + extra, TYPE_HEADERS, f, *stream_id);
                if let Some(spec) = priority {
                    put_priority(dst, spec);
                }
                dst.put_slice(block);
            }
            Frame::Priority { stream_id, spec } => {
                encode_header(dst, 5, TYPE_PRIORITY, 0, *stream_id);
                put_priority(dst, spec);
            }
            Frame::RstStream { stream_id, error_code } => {
                encode_header(dst, 4, TYPE_RST_STREAM, 0, *stream_id);
                dst.put_u32(error_code.as_u32());
            }
            Frame::Settings { ack, values } => {
                let f = if *ack { flags::ACK } else { 0 };
                encode_header(dst, values.len() * 6, TYPE_SETTINGS, f, 0);
                for (id, value) in values {
                    dst.put_u16(id.as_u16());
                    dst.put_u32(*value);
                }
            }
            Frame::PushPromise { stream_id, promised_id, block, end_headers } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                encode_header(dst, block.len() + 4, TYPE_PUSH_PROMISE, f, *stream_id);
                dst.put_u32(promised_id & 0x7fff_ffff);
                dst.put_slice(block);
            }
            Frame::Ping { ack, payload } => {
                let f = if *ack { flags::ACK } else { 0 };
                encode_header(dst, 8, TYPE_PING, f, 0);
                dst.put_slice(payload);
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                encode_header(dst, 8 + debug_data.len(), TYPE_GOAWAY, 0, 0);
                dst.put_u32(last_stream_id & 0x7fff_ffff);
                dst.put_u32(error_code.as_u32());
                dst.put_slice(debug_data);
            }
            Frame::WindowUpdate { stream_id, increment } => {
                encode_header(dst, 4, TYPE_WINDOW_UPDATE, 0, *stream_id);
                dst.put_u32(increment & 0x7fff_ffff);
            }
            Frame::Continuation { stream_id, block, end_headers } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                encode_header(dst, block.len(), TYPE_CONTINUATION, f, *stream_id);
                dst.put_slice(block);
            }
            Frame::Unknown { frame_type, flags, stream_id, length } => {
                encode_header(dst, *length as usize, *frame_type, *flags, *stream_id);
                dst.put_bytes(0, *length as usize);
            }
        }
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn encode_header(dst: &mut BytesMut, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    dst.reserve(FRAME_HEADER_SIZE + length);
    dst.put_u8(((length >> 16) & 0xff) as u8);
    dst.put_u8(((length >> 8) & 0xff) as u8);
    dst.put_u8((length & 0xff) as u8);
    dst.put_u8(frame_type);
    dst.put_u8(flags);
    dst.put_u32(stream_id & 0x7fff_ffff);
}

fn put_priority(dst: &mut BytesMut, spec: &PrioritySpec) {
    let mut dep = spec.dependency & 0x7fff_ffff;
    if spec.exclusive {
        dep |= 0x8000_0000;
    }
    dst.put_u32(dep);
    // Weight is sent as weight - 1.
    dst.put_u8((spec.weight.clamp(1, 256) - 1) as u8);
}

/// Write a HEADERS frame followed by as many CONTINUATION frames as the
/// peer's maximum frame size requires.
pub fn encode_header_block(
    dst: &mut BytesMut,
    stream_id: u32,
    block: Bytes,
    end_stream: bool,
    priority: Option<PrioritySpec>,
    max_frame_size: u32,
) {
    let limit = max_frame_size.max(DEFAULT_MAX_FRAME_SIZE) as usize;
    let first_limit = if priority.is_some() { limit - 5 } else { limit };

    let mut rest = block;
    let first = rest.split_to(first_limit.min(rest.len()));
    Frame::Headers { stream_id, block: first, end_stream, end_headers: rest.is_empty(), priority }
        .encode(dst);

    while !rest.is_empty() {
        let chunk = rest.split_to(limit.min(rest.len()));
        Frame::Continuation { stream_id, block: chunk, end_headers: rest.is_empty() }.encode(dst);
    }
}

/// Incremental frame decoder over a byte accumulator.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// `max_frame_size` is the SETTINGS_MAX_FRAME_SIZE we advertised.
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` until a full frame is buffered. Consumed bytes are
    /// removed from `buf`.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let length = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
        if length > self.max_frame_size as usize {
            return Err(FrameError::TooLarge { length, limit: self.max_frame_size });
        }
        if buf.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        let frame_type = buf[3];
        let frame_flags = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(length).freeze();

        parse_payload(frame_type, frame_flags, stream_id, payload).map(Some)
    }
}

fn parse_payload(
    frame_type: u8,
    frame_flags: u8,
    stream_id: u32,
    mut payload: Bytes,
) -> Result<Frame, FrameError> {
    let length = payload.len();
    match frame_type {
        TYPE_DATA => {
            require_stream("DATA", stream_id)?;
            let data = strip_padding(frame_flags, &mut payload)?;
            Ok(Frame::Data {
                stream_id,
                data,
                end_stream: frame_flags & flags::END_STREAM != 0,
                flow_len: length as u32,
            })
        }
        TYPE_HEADERS => {
            require_stream("HEADERS", stream_id)?;
            let mut body = strip_padding(frame_flags, &mut payload)?;
            let priority = if frame_flags & flags::PRIORITY != 0 {
                if body.len() < 5 {
                    return Err(FrameError::BadLength("HEADERS", length));
                }
                Some(get_priority(&mut body))
            } else {
                None
            };
            Ok(Frame::Headers {
                stream_id,
                block: body,
                end_stream: frame_flags & flags::END_STREAM != 0,
                end_headers: frame_flags & flags::END_HEADERS != 0,
                priority,
            })
        }
        TYPE_PRIORITY => {
            require_stream("PRIORITY", stream_id)?;
            if length != 5 {
                return Err(FrameError::BadLength("PRIORITY", length));
            }
            Ok(Frame::Priority { stream_id, spec: get_priority(&mut payload) })
        }
        TYPE_RST_STREAM => {
            require_stream("RST_STREAM", stream_id)?;
            if length != 4 {
                return Err(FrameError::BadLength("RST_STREAM", length));
            }
            Ok(Frame::RstStream { stream_id, error_code: ErrorCode::from(payload.get_u32()) })
        }
        TYPE_SETTINGS => {
            require_connection("SETTINGS", stream_id)?;
            let ack = frame_flags & flags::ACK != 0;
            if length % 6 != 0 || (ack && length != 0) {
                return Err(FrameError::BadLength("SETTINGS", length));
            }
            let mut values = Vec::with_capacity(length / 6);
            while payload.has_remaining() {
                let id = SettingsId::from(payload.get_u16());
                values.push((id, payload.get_u32()));
            }
            Ok(Frame::Settings { ack, values })
        }
        TYPE_PUSH_PROMISE => {
            require_stream("PUSH_PROMISE", stream_id)?;
            let mut body = strip_padding(frame_flags, &mut payload)?;
            if body.len() < 4 {
                return Err(FrameError::BadLength("PUSH_PROMISE", length));
            }
            let promised_id = body.get_u32() & 0x7fff_ffff;
            Ok(Frame::PushPromise {
                stream_id,
                promised_id,
                block: body,
                end_headers: frame_flags & flags::END_HEADERS != 0,
            })
        }
        TYPE_PING => {
            require_connection("PING", stream_id)?;
            if length != 8 {
                return Err(FrameError::BadLength("PING", length));
            }
            let mut data = [0u8; 8];
            payload.copy_to_slice(&mut data);
            Ok(Frame::Ping { ack: frame_flags & flags::ACK != 0, payload: data })
        }
        TYPE_GOAWAY => {
            require_connection("GOAWAY", stream_id)?;
            if length < 8 {
                return Err(FrameError::BadLength("GOAWAY", length));
            }
            let last_stream_id = payload.get_u32() & 0x7fff_ffff;
            let error_code = ErrorCode::from(payload.get_u32());
            Ok(Frame::GoAway { last_stream_id, error_code, debug_data: payload })
        }
        TYPE_WINDOW_UPDATE => {
            if length != 4 {
                return Err(FrameError::BadLength("WINDOW_UPDATE", length));
            }
            Ok(Frame::WindowUpdate { stream_id, increment: payload.get_u32() & 0x7fff_ffff })
        }
        TYPE_CONTINUATION => {
            require_stream("CONTINUATION", stream_id)?;
            Ok(Frame::Continuation {
                stream_id,
                block: payload,
                end_headers: frame_flags & flags::END_HEADERS != 0,
            })
        }
        other => Ok(Frame::Unknown {
            frame_type: other,
            flags: frame_flags,
            stream_id,
            length: length as u32,
        }),
    }
}

fn require_stream(name: &'static str, stream_id: u32) -> Result<(), FrameError> {
    if stream_id == 0 {
        return Err(FrameError::BadStreamId(name, stream_id));
    }
    Ok(())
}

fn require_connection(name: &'static str, stream_id: u32) -> Result<(), FrameError> {
    if stream_id != 0 {
        return Err(FrameError::BadStreamId(name, stream_id));
    }
    Ok(())
}

fn strip_padding(frame_flags: u8, payload: &mut Bytes) -> Result<Bytes, FrameError> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload.split_off(0));
    }
    if payload.is_empty() {
        return Err(FrameError::BadPadding);
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(FrameError::BadPadding);
    }
    let body_len = payload.len() - pad_len;
    Ok(payload.split_to(body_len))
}

fn get_priority(buf: &mut Bytes) -> PrioritySpec {
    let raw = buf.get_u32();
    let weight = buf.get_u8() as u16 + 1;
    PrioritySpec { dependency: raw & 0x7fff_ffff, weight, exclusive: raw & 0x8000_0000 != 0 }
}
