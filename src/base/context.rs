//! Ergonomic error context helpers.
//!
//! Provides extension traits for converting transport IO errors into
//! `NetError` values the session understands.

use crate::base::neterror::NetError;
use std::io;

/// Map an IO error kind onto the closest Chromium network error.
pub fn map_io_error(err: &io::Error) -> NetError {
    match err.kind() {
        io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
        io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
        io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        io::ErrorKind::NotConnected => NetError::SocketNotConnected,
        io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => {
            NetError::ConnectionClosed
        }
        _ => NetError::ConnectionFailed,
    }
}

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Convert a transport read/write failure into a `NetError`.
    ///
    /// # Example
    /// ```ignore
    /// use spdynet::base::context::IoResultExt;
    ///
    /// let n = socket.read_buf(&mut buf).await.transport_context()?;
    /// ```
    fn transport_context(self) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn transport_context(self) -> Result<T, NetError> {
        self.map_err(|e| {
            let mapped = map_io_error(&e);
            tracing::debug!(error = %e, mapped = %mapped, "transport error");
            mapped
        })
    }
}
