//! HTTP/2 session multiplexing.
//!
//! Mirrors Chromium's `net/spdy/`:
//! - [`session`]: the sans-IO [`SpdySession`](session::SpdySession) core
//! - [`handle`]: async driver and per-stream handles
//! - [`sessionpool`]: live sessions by key, with certificate-based aliasing
//! - [`flowcontrol`], [`priority`], [`writequeue`]: flow control and scheduling
//! - [`push`]: server push matching and acceptance
//! - [`lifecycle`], [`earlydata`]: GOAWAY/draining and 0-RTT gating
//! - [`frame`], [`hpack`], [`headers`]: the wire format

pub mod config;
pub mod earlydata;
pub mod flowcontrol;
pub mod frame;
pub mod handle;
pub mod headers;
pub mod hpack;
pub mod lifecycle;
pub mod priority;
pub mod protocol;
pub mod push;
pub mod session;
pub mod sessionkey;
pub mod sessionpool;
pub mod settings;
pub mod stream;
pub mod writequeue;

pub use config::SessionConfig;
pub use handle::{SpdySessionHandle, SpdyStreamHandle};
pub use headers::HeaderBlock;
pub use session::{ReadResult, SessionInfo, SpdySession, StreamRequest};
pub use sessionkey::{SchemeHostPort, SpdySessionKey};
pub use sessionpool::SpdySessionPool;
pub use settings::H2Settings;
