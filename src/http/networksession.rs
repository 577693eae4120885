//! Shared state for all transactions of one client.

use crate::http::fallback::{Http11Fallback, NoHttp11Fallback};
use crate::http::retry::RetryConfig;
use crate::http::serverproperties::HttpServerProperties;
use crate::socket::transport::SessionConnector;
use crate::spdy::config::SessionConfig;
use crate::spdy::sessionpool::SpdySessionPool;
use std::sync::Arc;

/// Collaborators a transaction needs, like Chromium's `HttpNetworkSession`.
#[derive(Clone)]
pub struct HttpNetworkSession {
    pub spdy_session_pool: Arc<SpdySessionPool>,
    pub connector: Arc<dyn SessionConnector>,
    pub fallback: Arc<dyn Http11Fallback>,
    pub server_properties: Arc<HttpServerProperties>,
    pub retry_config: RetryConfig,
    /// Let hosts share a session whose certificate covers them.
    pub enable_ip_based_pooling: bool,
}

impl HttpNetworkSession {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            spdy_session_pool: Arc::new(SpdySessionPool::default()),
            connector,
            fallback: Arc::new(NoHttp11Fallback),
            server_properties: Arc::new(HttpServerProperties::new()),
            retry_config: RetryConfig::default(),
            enable_ip_based_pooling: true,
        }
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.spdy_session_pool = Arc::new(SpdySessionPool::new(config));
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn Http11Fallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn server_properties(mut self, properties: Arc<HttpServerProperties>) -> Self {
        self.server_properties = properties;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn enable_ip_based_pooling(mut self, enable: bool) -> Self {
        self.enable_ip_based_pooling = enable;
        self
    }
}

impl std::fmt::Debug for HttpNetworkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNetworkSession")
            .field("sessions", &self.spdy_session_pool.len())
            .field("retry_config", &self.retry_config)
            .field("enable_ip_based_pooling", &self.enable_ip_based_pooling)
            .finish_non_exhaustive()
    }
}
