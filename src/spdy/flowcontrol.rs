//! HTTP/2 flow control (RFC 7540 section 5.2 and 6.9).
//!
//! Pure window arithmetic. The session decides whether a failure is scoped
//! to a stream or to the whole connection; this module only reports it.

use crate::spdy::protocol::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlowControlError {
    /// Not enough send window; wait for a WINDOW_UPDATE.
    #[error("send window exhausted")]
    WouldBlock,
    /// The window would exceed 2^31 - 1.
    #[error("window size {0} exceeds 2^31-1")]
    Overflow(i64),
    /// The peer sent more than the window it was granted.
    #[error("peer sent {received} bytes with {available} bytes of window")]
    ReceiveWindowExceeded { received: u32, available: i64 },
    /// WINDOW_UPDATE increments must be at least 1.
    #[error("invalid window update delta {0}")]
    InvalidDelta(u32),
}

/// Window that limits what we may send.
///
/// May go negative after a SETTINGS-driven initial window decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    size: i64,
}

impl SendWindow {
    pub fn new(initial: i32) -> Self {
        Self { size: initial as i64 }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn increase(&mut self, delta: u32) -> Result<i64, FlowControlError> {
        if delta < 1 {
            return Err(FlowControlError::InvalidDelta(delta));
        }
        let new_size = self.size + delta as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(FlowControlError::Overflow(new_size));
        }
        self.size = new_size;
        Ok(new_size)
    }

    /// Apply a change of SETTINGS_INITIAL_WINDOW_SIZE (may be negative).
    pub fn adjust(&mut self, delta: i64) -> Result<i64, FlowControlError> {
        let new_size = self.size + delta;
        if new_size > MAX_WINDOW_SIZE {
            return Err(FlowControlError::Overflow(new_size));
        }
        self.size = new_size;
        Ok(new_size)
    }

    fn decrease(&mut self, n: usize) {
        self.size -= n as i64;
    }
}

/// Window that limits what the peer may send us.
///
/// `size` mirrors the peer's view exactly: it only grows when a
/// WINDOW_UPDATE is emitted, so it can never be driven negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvWindow {
    size: i64,
    max: i32,
    unacked: i64,
}

impl RecvWindow {
    /// A window the peer already believes is `max` bytes.
    pub fn new(max: i32) -> Self {
        Self { size: max as i64, max, unacked: 0 }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    /// Bytes consumed by the application but not yet returned to the peer.
    pub fn unacked(&self) -> i64 {
        self.unacked
    }

    /// Charge `n` received bytes against the window.
    pub fn on_received(&mut self, n: u32) -> Result<(), FlowControlError> {
        if n as i64 > self.size {
            return Err(FlowControlError::ReceiveWindowExceeded {
                received: n,
                available: self.size,
            });
        }
        self.size -= n as i64;
        Ok(())
    }

    /// Record `n` bytes handed to the application. Returns the WINDOW_UPDATE
    /// increment to send once `threshold` of the window has been consumed.
    pub fn on_consumed(&mut self, n: usize, threshold: f64) -> Option<u32> {
        if n == 0 {
            return None;
        }
        self.unacked += n as i64;
        let trigger = ((self.max as f64) * threshold).max(1.0) as i64;
        if self.unacked < trigger {
            return None;
        }
        let delta = self.unacked;
        self.size += delta;
        self.unacked = 0;
        Some(delta as u32)
    }

    /// Raise the window to `target`, returning the increment to advertise.
    fn raise_to(&mut self, target: i32) -> Option<u32> {
        if (target as i64) <= self.size {
            return None;
        }
        let delta = target as i64 - self.size;
        self.size = target as i64;
        self.max = target;
        Some(delta as u32)
    }
}

/// Send and receive windows of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamWindows {
    pub send: SendWindow,
    pub recv: RecvWindow,
}

impl StreamWindows {
    pub fn new(initial_send: i32, initial_recv: i32) -> Self {
        Self { send: SendWindow::new(initial_send), recv: RecvWindow::new(initial_recv) }
    }
}

/// Connection-level windows plus the rules that tie them to stream windows.
#[derive(Debug, Clone)]
pub struct FlowController {
    send: SendWindow,
    recv: RecvWindow,
    target_recv: i32,
    threshold: f64,
}

impl FlowController {
    /// `target_recv` is the session receive window we want; the peer starts
    /// at the protocol default until [`initial_window_update`] is sent.
    ///
    /// [`initial_window_update`]: FlowController::initial_window_update
    pub fn new(target_recv: i32, threshold: f64) -> Self {
        Self {
            send: SendWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
            recv: RecvWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
            target_recv,
            threshold,
        }
    }

    pub fn send_window(&self) -> i64 {
        self.send.size()
    }

    pub fn recv_window(&self) -> i64 {
        self.recv.size()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Increment for the WINDOW_UPDATE sent right after the preface, when
    /// the configured session window exceeds the protocol default.
    pub fn initial_window_update(&mut self) -> Option<u32> {
        self.recv.raise_to(self.target_recv)
    }

    /// Bytes of `stream` that may go out now: the smaller of both windows.
    pub fn sendable(&self, stream: &StreamWindows) -> usize {
        self.send.available().min(stream.send.available())
    }

    /// Charge `n` outgoing bytes to both the connection and stream windows.
    pub fn consume_send(
        &mut self,
        stream: &mut StreamWindows,
        n: usize,
    ) -> Result<(), FlowControlError> {
        if n > self.sendable(stream) {
            return Err(FlowControlError::WouldBlock);
        }
        self.send.decrease(n);
        stream.send.decrease(n);
        Ok(())
    }

    /// WINDOW_UPDATE on stream 0. Errors are connection-fatal.
    pub fn apply_session_window_update(&mut self, delta: u32) -> Result<i64, FlowControlError> {
        self.send.increase(delta)
    }

    /// WINDOW_UPDATE on a stream. Errors reset only that stream.
    pub fn apply_stream_window_update(
        stream: &mut StreamWindows,
        delta: u32,
    ) -> Result<i64, FlowControlError> {
        stream.send.increase(delta)
    }

    /// Apply a peer SETTINGS_INITIAL_WINDOW_SIZE change to every stream.
    /// Any overflow is connection-fatal; streams already adjusted keep the
    /// new value since the session is torn down anyway.
    pub fn apply_initial_window_change<'a>(
        streams: impl Iterator<Item = &'a mut StreamWindows>,
        old_initial: i32,
        new_initial: i32,
    ) -> Result<(), FlowControlError> {
        let delta = new_initial as i64 - old_initial as i64;
        for windows in streams {
            windows.send.adjust(delta)?;
        }
        Ok(())
    }

    /// Charge a received DATA payload (padding included) to the session window.
    pub fn on_session_data_received(&mut self, n: u32) -> Result<(), FlowControlError> {
        self.recv.on_received(n)
    }

    /// Return consumed bytes to the session window.
    pub fn on_session_data_consumed(&mut self, n: usize) -> Option<u32> {
        self.recv.on_consumed(n, self.threshold)
    }

    /// Return consumed bytes to a stream window.
    pub fn on_stream_data_consumed(&self, stream: &mut StreamWindows, n: usize) -> Option<u32> {
        stream.recv.on_consumed(n, self.threshold)
    }
}
