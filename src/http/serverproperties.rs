//! Remembered per-server protocol facts.
//!
//! Based on Chromium's `HttpServerProperties`: once a server (or proxy)
//! answers HTTP_1_1_REQUIRED, later requests in the same network partition
//! go straight to HTTP/1.1.

use crate::spdy::sessionkey::SchemeHostPort;
use dashmap::DashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServerKey {
    server: SchemeHostPort,
    network_anonymization_key: String,
}

impl ServerKey {
    fn new(server: &SchemeHostPort, network_anonymization_key: &str) -> Self {
        Self {
            server: server.clone(),
            network_anonymization_key: network_anonymization_key.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HttpServerProperties {
    http11_servers: DashSet<ServerKey>,
    http11_proxies: DashSet<ServerKey>,
}

impl HttpServerProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requires_http11(
        &self,
        server: &SchemeHostPort,
        network_anonymization_key: &str,
    ) -> bool {
        self.http11_servers.contains(&ServerKey::new(server, network_anonymization_key))
    }

    pub fn set_http11_required(&self, server: &SchemeHostPort, network_anonymization_key: &str) {
        tracing::debug!(%server, "marking server as requiring HTTP/1.1");
        self.http11_servers.insert(ServerKey::new(server, network_anonymization_key));
    }

    pub fn proxy_requires_http11(
        &self,
        proxy: &SchemeHostPort,
        network_anonymization_key: &str,
    ) -> bool {
        self.http11_proxies.contains(&ServerKey::new(proxy, network_anonymization_key))
    }

    pub fn set_proxy_http11_required(
        &self,
        proxy: &SchemeHostPort,
        network_anonymization_key: &str,
    ) {
        tracing::debug!(%proxy, "marking proxy as requiring HTTP/1.1");
        self.http11_proxies.insert(ServerKey::new(proxy, network_anonymization_key));
    }

    pub fn clear(&self) {
        self.http11_servers.clear();
        self.http11_proxies.clear();
    }
}
