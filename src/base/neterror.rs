use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Generic Errors
    #[error("Operation aborted")]
    Aborted,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("Not implemented")]
    NotImplemented,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("ALPN negotiation failed")]
    AlpnNegotiationFailed,
    #[error("Early data rejected")]
    EarlyDataRejected,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("HTTP/2 protocol error")]
    Http2ProtocolError,
    #[error("Incomplete HTTP/2 headers")]
    IncompleteHttp2Headers,
    #[error("HTTP/2 server refused stream")]
    Http2ServerRefusedStream,
    #[error("HTTP/2 inadequate transport security")]
    Http2InadequateTransportSecurity,
    #[error("HTTP/2 flow control error")]
    Http2FlowControlError,
    #[error("HTTP/2 frame size error")]
    Http2FrameSizeError,
    #[error("HTTP/2 compression error")]
    Http2CompressionError,
    #[error("HTTP/1.1 required")]
    Http11Required,
    #[error("Proxy HTTP/1.1 required")]
    ProxyHttp11Required,
    #[error("HTTP/2 RST_STREAM NO_ERROR received")]
    Http2RstStreamNoErrorReceived,
    #[error("HTTP/2 claimed pushed stream reset by server")]
    Http2ClaimedPushedStreamResetByServer,
    #[error("HTTP/2 stream closed")]
    Http2StreamClosed,
    #[error("HTTP/2 pushed response does not match")]
    Http2PushedResponseDoesNotMatch,

    // Session multiplexing conditions (custom codes starting at -1000)
    #[error("HTTP/2 peer concurrent stream limit reached")]
    Http2TooManyConcurrentStreams,
    #[error("HTTP/2 session is going away")]
    Http2SessionGoingAway,

    #[error("Unknown error code: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::InvalidArgument => -4,
            NetError::NotImplemented => -11,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::AlpnNegotiationFailed => -122,
            NetError::EarlyDataRejected => -178,
            NetError::InvalidUrl => -300,
            NetError::InvalidResponse => -320,
            NetError::EmptyResponse => -324,
            NetError::Http2ProtocolError => -337,
            NetError::IncompleteHttp2Headers => -347,
            NetError::Http2ServerRefusedStream => -351,
            NetError::Http2InadequateTransportSecurity => -360,
            NetError::Http2FlowControlError => -361,
            NetError::Http2FrameSizeError => -362,
            NetError::Http2CompressionError => -363,
            NetError::Http11Required => -365,
            NetError::ProxyHttp11Required => -366,
            NetError::Http2RstStreamNoErrorReceived => -372,
            NetError::Http2ClaimedPushedStreamResetByServer => -374,
            NetError::Http2StreamClosed => -376,
            NetError::Http2PushedResponseDoesNotMatch => -378,
            NetError::Http2TooManyConcurrentStreams => -1000,
            NetError::Http2SessionGoingAway => -1001,
            NetError::Unknown(code) => *code,
        }
    }

    /// True for errors that mean the HTTP/2 connection itself is unusable.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            NetError::Http2ProtocolError
                | NetError::Http2FlowControlError
                | NetError::Http2FrameSizeError
                | NetError::Http2CompressionError
                | NetError::Http2InadequateTransportSecurity
                | NetError::ConnectionClosed
                | NetError::ConnectionReset
                | NetError::ConnectionAborted
        )
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -4 => NetError::InvalidArgument,
            -11 => NetError::NotImplemented,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -122 => NetError::AlpnNegotiationFailed,
            -178 => NetError::EarlyDataRejected,
            -300 => NetError::InvalidUrl,
            -320 => NetError::InvalidResponse,
            -324 => NetError::EmptyResponse,
            -337 => NetError::Http2ProtocolError,
            -347 => NetError::IncompleteHttp2Headers,
            -351 => NetError::Http2ServerRefusedStream,
            -360 => NetError::Http2InadequateTransportSecurity,
            -361 => NetError::Http2FlowControlError,
            -362 => NetError::Http2FrameSizeError,
            -363 => NetError::Http2CompressionError,
            -365 => NetError::Http11Required,
            -366 => NetError::ProxyHttp11Required,
            -372 => NetError::Http2RstStreamNoErrorReceived,
            -374 => NetError::Http2ClaimedPushedStreamResetByServer,
            -376 => NetError::Http2StreamClosed,
            -378 => NetError::Http2PushedResponseDoesNotMatch,
            -1000 => NetError::Http2TooManyConcurrentStreams,
            -1001 => NetError::Http2SessionGoingAway,
            _ => NetError::Unknown(code),
        }
    }
}
