use crate::base::neterror::NetError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::str::FromStr;
use url::Url;

/// An HTTP/2 header list that strictly preserves order.
///
/// Unlike `http::HeaderMap` this holds pseudo-headers (`:method`, `:status`,
/// ...) and raw byte values, which is what HPACK produces and consumes.
/// Names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    headers: Vec<(String, Bytes)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self { headers: Vec::new() }
    }

    /// Build the pseudo-headers of a request for `url`.
    pub fn request(method: &Method, url: &Url) -> Result<Self, NetError> {
        let mut block = Self::new();
        block.append(":method", method.as_str());
        block.append(":authority", authority_of(url)?);
        block.append(":scheme", url.scheme());
        block.append(":path", path_of(url));
        Ok(block)
    }

    /// Build an extended CONNECT (RFC 8441) for a WebSocket over HTTP/2.
    pub fn websocket_connect(url: &Url) -> Result<Self, NetError> {
        let mut block = Self::new();
        block.append(":method", "CONNECT");
        block.append(":protocol", "websocket");
        block.append(":scheme", if url.scheme() == "wss" { "https" } else { "http" });
        block.append(":path", path_of(url));
        block.append(":authority", authority_of(url)?);
        Ok(block)
    }

    /// Replace an existing header in place, or append it.
    pub fn insert(&mut self, name: &str, value: impl AsRef<[u8]>) {
        let name = name.to_ascii_lowercase();
        let value = Bytes::copy_from_slice(value.as_ref());
        if let Some((_, v)) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            *v = value;
        } else {
            self.headers.push((name, value));
        }
    }

    /// Append without replacing, allowing repeated names.
    pub fn append(&mut self, name: &str, value: impl AsRef<[u8]>) {
        self.headers.push((name.to_ascii_lowercase(), Bytes::copy_from_slice(value.as_ref())));
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// All values of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn method(&self) -> Option<&str> {
        self.get_str(":method")
    }

    pub fn scheme(&self) -> Option<&str> {
        self.get_str(":scheme")
    }

    pub fn authority(&self) -> Option<&str> {
        self.get_str(":authority")
    }

    pub fn path(&self) -> Option<&str> {
        self.get_str(":path")
    }

    /// Response status, if present and well formed.
    pub fn status(&self) -> Option<u16> {
        let status = self.get_str(":status")?;
        if status.len() != 3 {
            return None;
        }
        status.parse().ok()
    }

    /// Reconstruct the request URL from the pseudo-headers.
    pub fn url(&self) -> Result<Url, NetError> {
        let scheme = self.scheme().ok_or(NetError::InvalidUrl)?;
        let authority = self.authority().ok_or(NetError::InvalidUrl)?;
        let path = self.path().ok_or(NetError::InvalidUrl)?;
        if authority.is_empty() || !path.starts_with('/') {
            return Err(NetError::InvalidUrl);
        }
        Url::parse(&format!("{}://{}{}", scheme, authority, path)).map_err(|_| NetError::InvalidUrl)
    }

    /// HTTP/2 forbids uppercase field names (RFC 7540 section 8.1.2).
    pub fn has_uppercase_name(&self) -> bool {
        self.headers.iter().any(|(n, _)| n.bytes().any(|b| b.is_ascii_uppercase()))
    }

    /// Regular (non pseudo) headers as a standard `http::HeaderMap`.
    /// Entries that are not valid HTTP header names or values are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if name.starts_with(':') {
                continue;
            }
            let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_bytes(value))
            else {
                continue;
            };
            map.append(name, value);
        }
        map
    }

    /// Append every entry of `map`, preserving its iteration order.
    pub fn extend_from_header_map(&mut self, map: &HeaderMap) {
        for (name, value) in map {
            self.append(name.as_str(), value.as_bytes());
        }
    }
}

/// Build a block from raw `(name, value)` pairs such as an HPACK decoder yields.
impl FromIterator<(Vec<u8>, Vec<u8>)> for HeaderBlock {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
        let headers = iter
            .into_iter()
            .map(|(n, v)| (String::from_utf8_lossy(&n).into_owned(), Bytes::from(v)))
            .collect();
        Self { headers }
    }
}

fn authority_of(url: &Url) -> Result<String, NetError> {
    let host = url.host_str().ok_or(NetError::InvalidUrl)?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn path_of(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}
