//! Unclaimed server pushes and the rules for handing them to requests.
//!
//! A promised stream is matched against a later request by its promised
//! request headers first. Once the pushed response headers are known, the
//! response's `Vary` and a 206 status narrow the match further.

use crate::spdy::headers::HeaderBlock;
use crate::spdy::stream::StreamKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

/// A promised stream nobody has claimed yet.
#[derive(Debug, Clone)]
pub struct PushCandidate {
    pub key: StreamKey,
    pub stream_id: u32,
    pub url: Url,
    pub promised: HeaderBlock,
    pub created_at: Instant,
}

/// Unclaimed pushes of one session, keyed by URL.
#[derive(Debug, Default)]
pub struct PushRegistry {
    unclaimed: HashMap<Url, PushCandidate>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unclaimed pushes.
    pub fn len(&self) -> usize {
        self.unclaimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unclaimed.is_empty()
    }

    pub fn contains_url(&self, url: &Url) -> bool {
        self.unclaimed.contains_key(url)
    }

    /// Returns false if the URL already has an unclaimed push.
    pub fn register(&mut self, candidate: PushCandidate) -> bool {
        if self.unclaimed.contains_key(&candidate.url) {
            return false;
        }
        self.unclaimed.insert(candidate.url.clone(), candidate);
        true
    }

    /// Find the push that can serve `request` for `url`.
    ///
    /// `response_of` returns the pushed response headers, if they have
    /// arrived. A mismatch leaves the candidate in place for other requests.
    pub fn find<'a, F>(&self, url: &Url, request: &HeaderBlock, response_of: F) -> Option<StreamKey>
    where
        F: Fn(StreamKey) -> Option<&'a HeaderBlock>,
    {
        let candidate = self.unclaimed.get(url)?;
        if !promise_matches_request(&candidate.promised, request) {
            return None;
        }
        if let Some(response) = response_of(candidate.key) {
            if !response_matches_request(&candidate.promised, response, request) {
                return None;
            }
        }
        Some(candidate.key)
    }

    /// Remove the candidate for `url` so it can be bound to a request.
    pub fn claim(&mut self, url: &Url) -> Option<PushCandidate> {
        self.unclaimed.remove(url)
    }

    /// Drop whichever candidate refers to `key`.
    pub fn remove_stream(&mut self, key: StreamKey) -> Option<PushCandidate> {
        let url = self.unclaimed.iter().find(|(_, c)| c.key == key).map(|(u, _)| u.clone())?;
        self.unclaimed.remove(&url)
    }

    /// Remove and return every candidate older than `timeout`.
    pub fn take_expired(&mut self, now: Instant, timeout: Duration) -> Vec<PushCandidate> {
        let expired: Vec<Url> = self
            .unclaimed
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.created_at) >= timeout)
            .map(|(u, _)| u.clone())
            .collect();
        expired.iter().filter_map(|u| self.unclaimed.remove(u)).collect()
    }

    pub fn drain(&mut self) -> Vec<PushCandidate> {
        self.unclaimed.drain().map(|(_, c)| c).collect()
    }
}

/// Compare the promised request with a new one: method, authority, scheme,
/// path and `Range` must agree.
pub fn promise_matches_request(promised: &HeaderBlock, request: &HeaderBlock) -> bool {
    let pseudo_equal = [":method", ":authority", ":scheme", ":path"]
        .iter()
        .all(|name| promised.get(name) == request.get(name));
    pseudo_equal && promised.get("range") == request.get("range")
}

/// Checks that need the pushed response: every header the response varies
/// on must be byte-identical, and a 206 must answer the same range.
pub fn response_matches_request(
    promised: &HeaderBlock,
    response: &HeaderBlock,
    request: &HeaderBlock,
) -> bool {
    if response.status() == Some(206) {
        match (promised.get("range"), request.get("range")) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
    }

    for vary in response.get_all("vary") {
        let Ok(vary) = std::str::from_utf8(vary) else {
            return false;
        };
        for field in vary.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if field == "*" {
                return false;
            }
            let field = field.to_ascii_lowercase();
            let pushed: Vec<&[u8]> = promised.get_all(&field).collect();
            let wanted: Vec<&[u8]> = request.get_all(&field).collect();
            if pushed != wanted {
                return false;
            }
        }
    }
    true
}
