//! # spdynet
//!
//! A Chromium-inspired client-side HTTP/2 session multiplexer for Rust.
//!
//! `spdynet` runs many concurrent requests over one HTTP/2 connection per
//! origin, following the behavior of Chromium's `SpdySession`: flow control,
//! priority-aware write scheduling, server push, 0-RTT gating and graceful
//! shutdown on GOAWAY.
//!
//! ## Features
//!
//! - **Multiplexing**: lazy stream ids, MAX_CONCURRENT_STREAMS queueing by priority
//! - **Flow Control**: session and stream windows with Chromium's update threshold
//! - **Priorities**: HTTP/2 dependency tree kept in sync with request priorities
//! - **Server Push**: Vary and Range aware matching of pushed responses
//! - **Session Pool**: exact-key reuse plus certificate-based aliasing
//! - **HTTP/1.1 Fallback**: remembered HTTP_1_1_REQUIRED per server and proxy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spdynet::http::{HttpNetworkSession, HttpNetworkTransaction, HttpRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let network = Arc::new(HttpNetworkSession::new(Arc::new(MyTlsConnector)));
//!     let request = HttpRequest::get("https://example.com/".parse().unwrap());
//!     let response = HttpNetworkTransaction::new(network, request).run().await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core types and error definitions
//! - [`spdy`] - HTTP/2 framing, sessions and the session pool
//! - [`http`] - Transactions, retries and HTTP/1.1 fallback
//! - [`socket`] - What a session needs from the transport

pub mod base;
pub mod http;
pub mod socket;
pub mod spdy;
