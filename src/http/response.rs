//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::spdy::headers::HeaderBlock;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};

/// HTTP Response with its body fully read.
/// Both the HTTP/2 path and the HTTP/1.1 fallback produce this type.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    trailers: Option<HeaderMap>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, version, headers, body, trailers: None }
    }

    /// Build from a decoded HTTP/2 response header block.
    pub fn from_h2(
        headers: &HeaderBlock,
        body: Bytes,
        trailers: Option<&HeaderBlock>,
    ) -> Result<Self, NetError> {
        let status = headers
            .status()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .ok_or(NetError::InvalidResponse)?;
        Ok(Self {
            status,
            version: Version::HTTP_2,
            headers: headers.to_header_map(),
            body,
            trailers: trailers.map(HeaderBlock::to_header_map),
        })
    }

    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::InvalidResponse)
    }

    /// Body parsed as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|_| NetError::InvalidResponse)
    }
}
