//! HTTP/2 protocol constants, error codes and setting identifiers.
//!
//! Based on Chromium's spdy_protocol.h (RFC 7540 section 6, 7 and 11).

use crate::base::neterror::NetError;
use serde::Serialize;

/// Client connection preface (RFC 7540 section 3.5).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of every frame header on the wire.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Initial flow control window for both sessions and streams.
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;

/// Largest legal flow control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = i32::MAX as i64;

/// Default and minimum value of SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take (2^24 - 1).
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// Largest legal stream identifier.
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// First client-initiated stream id.
pub const FIRST_STREAM_ID: u32 = 1;

/// Returns true for client-initiated (odd) stream ids.
pub fn is_client_stream_id(id: u32) -> bool {
    id % 2 == 1
}

/// Returns true for server-initiated (even, non-zero) stream ids.
pub fn is_push_stream_id(id: u32) -> bool {
    id != 0 && id % 2 == 0
}

/// RST_STREAM and GOAWAY error codes (RFC 7540 section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    /// Unknown codes must be treated as INTERNAL_ERROR but are preserved.
    Unknown(u32),
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Map a session-level `NetError` onto the GOAWAY code sent to the peer.
    /// Mirrors `MapNetErrorToGoAwayStatus`.
    pub fn from_net_error(err: NetError) -> Self {
        match err {
            NetError::Http2ProtocolError => ErrorCode::ProtocolError,
            NetError::Http2FlowControlError => ErrorCode::FlowControlError,
            NetError::Http2FrameSizeError => ErrorCode::FrameSizeError,
            NetError::Http2CompressionError => ErrorCode::CompressionError,
            NetError::Http2InadequateTransportSecurity => ErrorCode::InadequateSecurity,
            NetError::Http11Required => ErrorCode::Http11Required,
            NetError::Aborted | NetError::ConnectionClosed => ErrorCode::NoError,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Unknown(other),
        }
    }
}

/// SETTINGS identifiers (RFC 7540 section 6.5.2, RFC 8441).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    EnableConnectProtocol,
    Unknown(u16),
}

impl SettingsId {
    pub fn as_u16(self) -> u16 {
        match self {
            SettingsId::HeaderTableSize => 0x1,
            SettingsId::EnablePush => 0x2,
            SettingsId::MaxConcurrentStreams => 0x3,
            SettingsId::InitialWindowSize => 0x4,
            SettingsId::MaxFrameSize => 0x5,
            SettingsId::MaxHeaderListSize => 0x6,
            SettingsId::EnableConnectProtocol => 0x8,
            SettingsId::Unknown(id) => id,
        }
    }
}

impl From<u16> for SettingsId {
    fn from(id: u16) -> Self {
        match id {
            0x1 => SettingsId::HeaderTableSize,
            0x2 => SettingsId::EnablePush,
            0x3 => SettingsId::MaxConcurrentStreams,
            0x4 => SettingsId::InitialWindowSize,
            0x5 => SettingsId::MaxFrameSize,
            0x6 => SettingsId::MaxHeaderListSize,
            0x8 => SettingsId::EnableConnectProtocol,
            other => SettingsId::Unknown(other),
        }
    }
}
