//! Transport collaborators.
//!
//! Mirrors the parts of Chromium's `net/socket/` an HTTP/2 session touches:
//! - [`stream`]: the boxed byte stream a session runs over
//! - [`transport`]: connecting, TLS facts and 0-RTT confirmation

pub mod stream;
pub mod transport;
