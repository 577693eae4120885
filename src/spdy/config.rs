//! HTTP/2 session configuration.

use crate::spdy::settings::H2Settings;
use std::time::Duration;

/// Per-session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SETTINGS advertised to the server.
    pub settings: H2Settings,
    /// Target connection-level receive window, raised from 65535 at startup.
    pub session_max_recv_window_size: i32,
    /// Fraction of a receive window that must be consumed before a
    /// WINDOW_UPDATE is sent.
    pub window_update_threshold: f64,
    /// How long a pushed stream may wait to be claimed.
    pub unclaimed_push_timeout: Duration,
    /// Upper bound on concurrently reserved/open pushed streams.
    pub max_concurrent_pushed_streams: usize,
    /// Answer server PINGs.
    pub enable_ping_ack: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settings: H2Settings::default(),
            session_max_recv_window_size: 15 * 1024 * 1024, // 15 MB
            window_update_threshold: 0.5,
            unclaimed_push_timeout: Duration::from_secs(5 * 60),
            max_concurrent_pushed_streams: 1000,
            enable_ping_ack: true,
        }
    }
}

impl SessionConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised SETTINGS.
    pub fn settings(mut self, settings: H2Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the connection-level receive window target.
    pub fn session_max_recv_window_size(mut self, size: i32) -> Self {
        self.session_max_recv_window_size = size;
        self
    }

    /// Set the per-stream receive window (SETTINGS_INITIAL_WINDOW_SIZE).
    pub fn stream_max_recv_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = size;
        self
    }

    /// Set the WINDOW_UPDATE threshold, clamped to (0, 1].
    pub fn window_update_threshold(mut self, fraction: f64) -> Self {
        self.window_update_threshold = fraction.clamp(f64::MIN_POSITIVE, 1.0);
        self
    }

    /// Set how long pushed streams wait to be claimed.
    pub fn unclaimed_push_timeout(mut self, timeout: Duration) -> Self {
        self.unclaimed_push_timeout = timeout;
        self
    }

    /// Set the cap on pushed streams.
    pub fn max_concurrent_pushed_streams(mut self, max: usize) -> Self {
        self.max_concurrent_pushed_streams = max;
        self
    }

    /// Enable or disable PING acknowledgements.
    pub fn enable_ping_ack(mut self, enable: bool) -> Self {
        self.enable_ping_ack = enable;
        self
    }

    /// Per-stream receive window as a signed window size.
    pub fn stream_recv_window(&self) -> i32 {
        self.settings.initial_window_size.min(i32::MAX as u32) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.session_max_recv_window_size, 15 * 1024 * 1024);
        assert_eq!(config.window_update_threshold, 0.5);
        assert_eq!(config.stream_recv_window(), 6 * 1024 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let config = SessionConfig::new()
            .stream_max_recv_window_size(1024)
            .window_update_threshold(2.0)
            .enable_ping_ack(false);

        assert_eq!(config.stream_recv_window(), 1024);
        assert_eq!(config.window_update_threshold, 1.0);
        assert!(!config.enable_ping_ack);
    }
}
