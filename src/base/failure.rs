//! Caller-visible request failures.

use crate::base::neterror::NetError;

/// A failed request together with how far it got on the wire.
///
/// Callers use `request_sent` and `response_started` to tell "nothing was
/// sent" apart from "a partial response may have been processed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{error} (request_sent={request_sent}, response_started={response_started})")]
pub struct RequestFailure {
    pub error: NetError,
    pub request_sent: bool,
    pub response_started: bool,
}

impl RequestFailure {
    pub fn new(error: NetError, request_sent: bool, response_started: bool) -> Self {
        Self { error, request_sent, response_started }
    }

    /// Failure before anything reached the wire.
    pub fn unsent(error: NetError) -> Self {
        Self::new(error, false, false)
    }

    /// Whether a higher layer may replay the request without risking
    /// duplicate side effects.
    pub fn is_safe_to_retry(&self) -> bool {
        if self.response_started {
            return false;
        }
        !self.request_sent
            || matches!(
                self.error,
                NetError::Http2ServerRefusedStream
                    | NetError::Http2SessionGoingAway
                    | NetError::Http11Required
                    | NetError::ProxyHttp11Required
            )
    }
}

impl From<RequestFailure> for NetError {
    fn from(failure: RequestFailure) -> Self {
        failure.error
    }
}
