//! Registry of live HTTP/2 sessions.
//!
//! Based on Chromium's `SpdySessionPool`. Sessions are looked up by exact
//! [`SpdySessionKey`] first; with IP-based pooling enabled, a session whose
//! certificate covers another host may be shared with it. Without DNS the
//! "same IP" condition is approximated by matching scheme and port.

use crate::base::neterror::NetError;
use crate::socket::transport::SessionConnector;
use crate::spdy::config::SessionConfig;
use crate::spdy::earlydata::EarlyDataGate;
use crate::spdy::handle::SpdySessionHandle;
use crate::spdy::session::SpdySession;
use crate::spdy::sessionkey::{SchemeHostPort, SpdySessionKey};
use dashmap::DashMap;
use std::sync::Arc;

/// Destination plus the partitioning that must match for aliasing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AliasKey {
    destination: SchemeHostPort,
    privacy_mode: bool,
    network_anonymization_key: String,
}

impl AliasKey {
    fn of(key: &SpdySessionKey) -> Self {
        Self {
            destination: key.destination.clone(),
            privacy_mode: key.privacy_mode,
            network_anonymization_key: key.network_anonymization_key.clone(),
        }
    }
}

pub struct SpdySessionPool {
    sessions: DashMap<SpdySessionKey, SpdySessionHandle>,
    /// Hosts served by a session created for another key.
    aliases: DashMap<AliasKey, SpdySessionKey>,
    config: SessionConfig,
}

impl Default for SpdySessionPool {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SpdySessionPool {
    pub fn new(config: SessionConfig) -> Self {
        Self { sessions: DashMap::new(), aliases: DashMap::new(), config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// An available session for `key`, or one that may be shared with it.
    pub fn find_available_session(
        &self,
        key: &SpdySessionKey,
        enable_ip_based_pooling: bool,
    ) -> Option<SpdySessionHandle> {
        if let Some(handle) = self.sessions.get(key).filter(|h| h.is_available()) {
            return Some(handle.clone());
        }
        if !enable_ip_based_pooling {
            return None;
        }

        let alias_key = AliasKey::of(key);
        if let Some(target) = self.aliases.get(&alias_key).map(|k| k.clone()) {
            match self.sessions.get(&target).filter(|h| h.is_available() && can_alias(h, key)) {
                Some(handle) => return Some(handle.clone()),
                None => {
                    self.aliases.remove(&alias_key);
                }
            }
        }

        let found = self
            .sessions
            .iter()
            .find(|entry| entry.value().is_available() && can_alias(entry.value(), key))
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        let (target, handle) = found?;
        tracing::debug!(
            host = %key.destination,
            session = %target.destination,
            "pooling onto existing session"
        );
        self.aliases.insert(alias_key, target);
        Some(handle)
    }

    /// Register a started session. A previous session for the same key is
    /// replaced (it keeps running until its streams finish).
    pub fn insert(&self, handle: SpdySessionHandle) {
        let key = handle.key().clone();
        if let Some(old) = self.sessions.insert(key, handle) {
            tracing::debug!(host = %old.key().destination, "replacing pooled session");
        }
    }

    pub fn remove(&self, key: &SpdySessionKey) -> Option<SpdySessionHandle> {
        self.aliases.retain(|_, target| *target != *key);
        self.sessions.remove(key).map(|(_, handle)| handle)
    }

    /// Retire sessions that went away, so new requests open fresh ones.
    pub fn remove_unavailable(&self) -> usize {
        let stale: Vec<SpdySessionKey> = self
            .sessions
            .iter()
            .filter(|e| !e.value().is_available())
            .map(|e| e.key().clone())
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Abort every session.
    pub fn close_all(&self, error: NetError) {
        for entry in self.sessions.iter() {
            entry.value().close(error);
        }
        self.sessions.clear();
        self.aliases.clear();
    }

    /// Reuse a session for `key` or connect a new one.
    ///
    /// Fails with `AlpnNegotiationFailed` when the server did not pick `h2`;
    /// the caller is expected to fall back to HTTP/1.1.
    pub async fn get_or_connect<C>(
        &self,
        key: &SpdySessionKey,
        connector: &C,
        enable_ip_based_pooling: bool,
    ) -> Result<SpdySessionHandle, NetError>
    where
        C: SessionConnector + ?Sized,
    {
        if let Some(handle) = self.find_available_session(key, enable_ip_based_pooling) {
            return Ok(handle);
        }

        let connected = connector.connect(key).await?;
        if !connected.ssl_info.is_h2() {
            tracing::debug!(
                host = %key.destination,
                alpn = ?connected.ssl_info.negotiated_protocol,
                "server did not negotiate h2"
            );
            return Err(NetError::AlpnNegotiationFailed);
        }
        // Another task may have connected while we were waiting.
        if let Some(handle) = self.find_available_session(key, false) {
            return Ok(handle);
        }

        let gate = Arc::new(EarlyDataGate::new(connected.confirmer, !connected.early_data));
        let session = SpdySession::new(
            key.clone(),
            self.config.clone(),
            connected.ssl_info,
            !connected.early_data,
        );
        let handle = SpdySessionHandle::start(connected.socket, session, gate);
        self.insert(handle.clone());
        tracing::debug!(host = %key.destination, "new HTTP/2 session");
        Ok(handle)
    }
}

fn can_alias(handle: &SpdySessionHandle, key: &SpdySessionKey) -> bool {
    let existing = handle.key();
    existing.proxy == key.proxy
        && existing.privacy_mode == key.privacy_mode
        && existing.network_anonymization_key == key.network_anonymization_key
        && existing.socket_tag == key.socket_tag
        && existing.destination.scheme == key.destination.scheme
        && existing.destination.port == key.destination.port
        && handle.ssl_info().can_pool_for(&key.destination.host)
}
