//! Retry decisions for multiplexed requests.
//!
//! Based on Chromium's `HttpNetworkTransaction::RetryReason` enum and retry logic.
//! See: net/http/http_network_transaction.h

use crate::base::failure::RequestFailure;
use crate::base::neterror::NetError;
use std::time::Duration;

/// Why a failed request may be replayed (mirrors Chromium's RetryReason enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Origin answered RST_STREAM or GOAWAY with HTTP_1_1_REQUIRED
    Http11Required,
    /// Same, for the proxy tunnel
    ProxyHttp11Required,
    /// Stream refused before processing (RST or above GOAWAY's last id)
    Http2ServerRefusedStream,
    /// Session went away before the HEADERS were sent
    Http2SessionGoingAway,
    /// A pushed stream we claimed was reset
    Http2ClaimedPushedStreamResetByServer,
    /// A claimed push turned out not to match on its response headers
    Http2PushedResponseDoesNotMatch,
    /// Transport reset on a reused session before any response
    ConnectionReset,
}

impl RetryReason {
    /// Map a failure to a RetryReason, if the request may be replayed.
    ///
    /// `reused_session` tells whether the session existed before this
    /// request; a fresh connection that resets is not retried.
    pub fn from_failure(failure: &RequestFailure, reused_session: bool) -> Option<Self> {
        if failure.response_started {
            return None;
        }
        match failure.error {
            NetError::Http11Required => Some(Self::Http11Required),
            NetError::ProxyHttp11Required => Some(Self::ProxyHttp11Required),
            NetError::Http2ServerRefusedStream => Some(Self::Http2ServerRefusedStream),
            NetError::Http2SessionGoingAway => Some(Self::Http2SessionGoingAway),
            NetError::Http2ClaimedPushedStreamResetByServer => {
                Some(Self::Http2ClaimedPushedStreamResetByServer)
            }
            NetError::Http2PushedResponseDoesNotMatch => {
                Some(Self::Http2PushedResponseDoesNotMatch)
            }
            NetError::ConnectionReset | NetError::ConnectionClosed | NetError::ConnectionAborted
                if reused_session =>
            {
                Some(Self::ConnectionReset)
            }
            _ => None,
        }
    }

    /// Whether the retry must go over HTTP/1.1 instead of a session.
    pub fn requires_http11(self) -> bool {
        matches!(self, Self::Http11Required | Self::ProxyHttp11Required)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries per logical request (default: 1)
    pub max_attempts: usize,
    /// Base delay for exponential backoff in milliseconds (default: 0)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 5000)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) to randomize delays (default: 0.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 5000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }
}

/// Calculate backoff delay for a given attempt.
///
/// Uses exponential backoff: `base_delay * 2^attempt`
/// Capped at `max_delay_ms`.
pub fn calculate_backoff(attempt: usize, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    // Exponential: base * 2^(attempt-1)
    let delay_ms = config
        .base_delay_ms
        .saturating_mul(1 << (attempt - 1).min(10));
    let capped_ms = delay_ms.min(config.max_delay_ms);

    let jitter_range = (capped_ms as f64 * config.jitter_factor) as u64;
    let jittered_ms = if jitter_range > 0 {
        // Deterministic jitter based on attempt number
        let jitter = (attempt as u64 * 7) % jitter_range;
        capped_ms.saturating_add(jitter)
    } else {
        capped_ms
    };

    Duration::from_millis(jittered_ms)
}

/// Check if we should retry based on attempt count.
pub fn should_retry(attempt: usize, config: &RetryConfig) -> bool {
    attempt < config.max_attempts
}
