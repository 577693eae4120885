//! A logical HTTP request, independent of the protocol that carries it.

use crate::base::neterror::NetError;
use crate::base::requestpriority::RequestPriority;
use crate::spdy::session::StreamRequest;
use crate::spdy::sessionkey::{SchemeHostPort, SpdySessionKey};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub priority: RequestPriority,
    /// Proxy to tunnel through, if any.
    pub proxy: Option<SchemeHostPort>,
    pub privacy_mode: bool,
    pub network_anonymization_key: String,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            priority: RequestPriority::default(),
            proxy: None,
            privacy_mode: false,
            network_anonymization_key: String::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header to the request.
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, NetError> {
        let name = HeaderName::from_str(name).map_err(|_| NetError::InvalidArgument)?;
        let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidArgument)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn proxy(mut self, proxy: SchemeHostPort) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn privacy_mode(mut self, privacy_mode: bool) -> Self {
        self.privacy_mode = privacy_mode;
        self
    }

    pub fn network_anonymization_key(mut self, key: impl Into<String>) -> Self {
        self.network_anonymization_key = key.into();
        self
    }

    pub fn destination(&self) -> Result<SchemeHostPort, NetError> {
        SchemeHostPort::from_url(&self.url).ok_or(NetError::InvalidUrl)
    }

    /// Key of the session this request may share.
    pub fn session_key(&self) -> Result<SpdySessionKey, NetError> {
        let mut key = SpdySessionKey::new(self.destination()?)
            .with_privacy_mode(self.privacy_mode)
            .with_network_anonymization_key(self.network_anonymization_key.clone());
        if let Some(proxy) = &self.proxy {
            key = key.with_proxy(proxy.clone());
        }
        Ok(key)
    }

    /// The HEADERS this request sends on a stream.
    pub fn to_stream_request(&self) -> Result<StreamRequest, NetError> {
        let mut request = StreamRequest::for_url(&self.method, &self.url)?
            .priority(self.priority)
            .has_body(self.body.as_ref().is_some_and(|b| !b.is_empty()));
        request.headers.extend_from_header_map(&self.headers);
        Ok(request)
    }
}
