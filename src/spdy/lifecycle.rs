//! Session availability: GOAWAY, draining and teardown.

use crate::base::neterror::NetError;
use crate::spdy::protocol::ErrorCode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Accepting new streams.
    Active,
    /// GOAWAY received or sent; existing streams may finish.
    GracefullyClosing,
    /// Nothing left to do after a graceful close.
    Drained,
    /// Torn down by an error.
    Aborted,
}

/// How streams are failed when a GOAWAY arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoAwayPlan {
    pub last_stream_id: u32,
    /// For client streams above `last_stream_id`.
    pub above_last: NetError,
    /// For work whose HEADERS never went out.
    pub unsent: NetError,
    /// The whole session must drain with this error.
    pub drain: Option<NetError>,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    goaway_last_stream_id: Option<u32>,
    goaway_code: Option<ErrorCode>,
    error_on_close: Option<NetError>,
    connect_protocol: Option<bool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Active,
            goaway_last_stream_id: None,
            goaway_code: None,
            error_on_close: None,
            connect_protocol: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// New streams may be opened.
    pub fn is_available(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_going_away(&self) -> bool {
        self.state == SessionState::GracefullyClosing
    }

    /// Drained or aborted; the transport can go.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Drained | SessionState::Aborted)
    }

    pub fn goaway_last_stream_id(&self) -> Option<u32> {
        self.goaway_last_stream_id
    }

    pub fn goaway_code(&self) -> Option<ErrorCode> {
        self.goaway_code
    }

    pub fn error_on_close(&self) -> Option<NetError> {
        self.error_on_close
    }

    /// Record a GOAWAY and describe how to fail the affected work. The
    /// lowest `last_stream_id` seen wins.
    pub fn on_goaway(&mut self, last_stream_id: u32, code: ErrorCode) -> GoAwayPlan {
        let last =
            self.goaway_last_stream_id.map_or(last_stream_id, |prev| prev.min(last_stream_id));
        self.goaway_last_stream_id = Some(last);
        self.goaway_code = Some(code);
        if self.state == SessionState::Active {
            self.state = SessionState::GracefullyClosing;
        }

        let (above_last, drain) = match code {
            ErrorCode::NoError => (NetError::Http2ServerRefusedStream, None),
            ErrorCode::Http11Required => (NetError::Http11Required, Some(NetError::Http11Required)),
            _ => (NetError::Aborted, None),
        };
        GoAwayPlan {
            last_stream_id: last,
            above_last,
            unsent: NetError::Http2SessionGoingAway,
            drain,
        }
    }

    /// Stop accepting streams without a peer GOAWAY (for example when
    /// stream ids run out).
    pub fn start_going_away(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::GracefullyClosing;
        }
    }

    /// A graceful close finished once no streams remain.
    pub fn maybe_finish_draining(&mut self, has_streams: bool) -> bool {
        if self.state == SessionState::GracefullyClosing && !has_streams {
            self.state = SessionState::Drained;
            return true;
        }
        false
    }

    /// Returns false if the session was already closed.
    pub fn abort(&mut self, error: NetError) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SessionState::Aborted;
        self.error_on_close = Some(error);
        true
    }

    /// Whether tearing down with `error` announces itself with a GOAWAY.
    pub fn sends_goaway_for(error: NetError) -> bool {
        !matches!(
            error,
            NetError::Aborted
                | NetError::ConnectionClosed
                | NetError::SocketNotConnected
                | NetError::Http11Required
                | NetError::ConnectionRefused
        )
    }

    pub fn supports_websocket(&self) -> bool {
        self.connect_protocol == Some(true)
    }

    /// Apply SETTINGS_ENABLE_CONNECT_PROTOCOL. Once enabled it cannot be
    /// withdrawn.
    pub fn on_enable_connect_protocol(&mut self, value: u32) -> Result<(), NetError> {
        match (value, self.connect_protocol) {
            (0, Some(true)) => Err(NetError::Http2ProtocolError),
            (0, _) => {
                self.connect_protocol = Some(false);
                Ok(())
            }
            (1, _) => {
                self.connect_protocol = Some(true);
                Ok(())
            }
            _ => Err(NetError::Http2ProtocolError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goaway_no_error_plan() {
        let mut lifecycle = Lifecycle::new();
        let plan = lifecycle.on_goaway(3, ErrorCode::NoError);
        assert_eq!(plan.above_last, NetError::Http2ServerRefusedStream);
        assert_eq!(plan.unsent, NetError::Http2SessionGoingAway);
        assert_eq!(plan.drain, None);
        assert!(!lifecycle.is_available());
        assert!(lifecycle.is_going_away());
    }

    #[test]
    fn test_goaway_error_codes() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.on_goaway(7, ErrorCode::ProtocolError).above_last, NetError::Aborted);
        let plan = lifecycle.on_goaway(9, ErrorCode::Http11Required);
        assert_eq!(plan.drain, Some(NetError::Http11Required));
        // A later GOAWAY cannot raise the bound.
        assert_eq!(plan.last_stream_id, 7);
    }

    #[test]
    fn test_draining() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.maybe_finish_draining(false));
        lifecycle.on_goaway(1, ErrorCode::NoError);
        assert!(!lifecycle.maybe_finish_draining(true));
        assert!(lifecycle.maybe_finish_draining(false));
        assert_eq!(lifecycle.state(), SessionState::Drained);
        assert!(!lifecycle.abort(NetError::ConnectionClosed));
    }

    #[test]
    fn test_abort_records_error() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.abort(NetError::Http2ProtocolError));
        assert_eq!(lifecycle.error_on_close(), Some(NetError::Http2ProtocolError));
        assert!(lifecycle.is_closed());
    }

    #[test]
    fn test_connect_protocol_cannot_be_withdrawn() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.supports_websocket());
        lifecycle.on_enable_connect_protocol(0).unwrap();
        lifecycle.on_enable_connect_protocol(1).unwrap();
        assert!(lifecycle.supports_websocket());
        assert_eq!(lifecycle.on_enable_connect_protocol(0), Err(NetError::Http2ProtocolError));
        assert_eq!(lifecycle.on_enable_connect_protocol(2), Err(NetError::Http2ProtocolError));
        assert!(lifecycle.supports_websocket());
    }

    #[test]
    fn test_goaway_suppressed_for_transport_errors() {
        assert!(!Lifecycle::sends_goaway_for(NetError::ConnectionClosed));
        assert!(!Lifecycle::sends_goaway_for(NetError::Http11Required));
        assert!(Lifecycle::sends_goaway_for(NetError::Http2ProtocolError));
    }
}
