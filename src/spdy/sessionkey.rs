//! Identity of a pooled HTTP/2 session.

use serde::Serialize;
use std::fmt;
use url::Url;

/// An origin without the path: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemeHostPort {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl SchemeHostPort {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { scheme: scheme.into(), host: host.into(), port }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        Some(SchemeHostPort {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default()?,
        })
    }
}

impl fmt::Display for SchemeHostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Sessions are shared only between requests with an equal key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SpdySessionKey {
    pub destination: SchemeHostPort,
    /// HTTP/2 proxy the session tunnels through, if any.
    pub proxy: Option<SchemeHostPort>,
    pub privacy_mode: bool,
    /// Opaque network partition.
    pub network_anonymization_key: String,
    pub socket_tag: u32,
}

impl SpdySessionKey {
    pub fn new(destination: SchemeHostPort) -> Self {
        Self {
            destination,
            proxy: None,
            privacy_mode: false,
            network_anonymization_key: String::new(),
            socket_tag: 0,
        }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        SchemeHostPort::from_url(url).map(Self::new)
    }

    pub fn with_proxy(mut self, proxy: SchemeHostPort) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_privacy_mode(mut self, privacy_mode: bool) -> Self {
        self.privacy_mode = privacy_mode;
        self
    }

    pub fn with_network_anonymization_key(mut self, key: impl Into<String>) -> Self {
        self.network_anonymization_key = key.into();
        self
    }

    pub fn with_socket_tag(mut self, tag: u32) -> Self {
        self.socket_tag = tag;
        self
    }

    /// Same key but for another destination; used for alias lookups.
    pub fn for_destination(&self, destination: SchemeHostPort) -> Self {
        Self { destination, ..self.clone() }
    }
}
