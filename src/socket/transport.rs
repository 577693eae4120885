//! What an HTTP/2 session needs from the layer below it.
//!
//! Connecting, TLS and DNS live behind these traits. The session only sees
//! a connected byte stream, the certificate facts that govern pooling and
//! push, and a way to wait for 0-RTT handshake confirmation.

use crate::base::neterror::NetError;
use crate::socket::stream::BoxedSocket;
use crate::spdy::sessionkey::SpdySessionKey;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;

/// Facts about the TLS connection a session runs over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SslInfo {
    /// ALPN result, e.g. `h2` or `http/1.1`.
    pub negotiated_protocol: Option<String>,
    /// A client certificate was presented.
    pub client_cert_sent: bool,
    /// The server certificate verified without errors.
    pub cert_status_ok: bool,
    /// DNS names (possibly wildcards) the server certificate covers.
    pub dns_names: Vec<String>,
}

impl SslInfo {
    /// A verified `h2` connection for `names`.
    pub fn h2(names: &[&str]) -> Self {
        Self {
            negotiated_protocol: Some("h2".to_string()),
            client_cert_sent: false,
            cert_status_ok: true,
            dns_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn is_h2(&self) -> bool {
        self.negotiated_protocol.as_deref() == Some("h2")
    }

    /// Whether the certificate names `host`. A wildcard covers exactly one
    /// leftmost label.
    pub fn covers_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.dns_names.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            match name.strip_prefix("*.") {
                Some(suffix) => host
                    .split_once('.')
                    .map(|(label, rest)| !label.is_empty() && rest == suffix)
                    .unwrap_or(false),
                None => name == host,
            }
        })
    }

    /// A connection may carry traffic for another origin only if the
    /// certificate is valid for it and no client certificate was sent.
    pub fn can_pool_for(&self, host: &str) -> bool {
        self.cert_status_ok && !self.client_cert_sent && self.covers_host(host)
    }
}

/// Waits for the TLS handshake to be confirmed after sending 0-RTT data.
///
/// Implementations must be idempotent: every call after the first resolves
/// to the same outcome.
pub trait HandshakeConfirmer: Send + Sync {
    fn confirm_handshake(&self) -> BoxFuture<'_, Result<(), NetError>>;
}

impl<C: HandshakeConfirmer + ?Sized> HandshakeConfirmer for Arc<C> {
    fn confirm_handshake(&self) -> BoxFuture<'_, Result<(), NetError>> {
        (**self).confirm_handshake()
    }
}

/// Confirmer for connections that never sent early data.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyConfirmed;

impl HandshakeConfirmer for AlreadyConfirmed {
    fn confirm_handshake(&self) -> BoxFuture<'_, Result<(), NetError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Result of [`SessionConnector::connect`].
pub struct ConnectedSocket {
    pub socket: BoxedSocket,
    pub ssl_info: SslInfo,
    pub confirmer: Arc<dyn HandshakeConfirmer>,
    /// The handshake is still unconfirmed (0-RTT was used).
    pub early_data: bool,
}

impl std::fmt::Debug for ConnectedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedSocket")
            .field("ssl_info", &self.ssl_info)
            .field("early_data", &self.early_data)
            .finish_non_exhaustive()
    }
}

/// Establishes the transport for a session: DNS, TCP, proxy tunnel and TLS.
pub trait SessionConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        key: &'a SpdySessionKey,
    ) -> BoxFuture<'a, Result<ConnectedSocket, NetError>>;
}

impl<C: SessionConnector + ?Sized> SessionConnector for Arc<C> {
    fn connect<'a>(
        &'a self,
        key: &'a SpdySessionKey,
    ) -> BoxFuture<'a, Result<ConnectedSocket, NetError>> {
        (**self).connect(key)
    }
}
