//! Holds back non-idempotent requests until a 0-RTT handshake is confirmed.

use crate::base::neterror::NetError;
use crate::socket::transport::HandshakeConfirmer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Per-session latch over the transport's handshake confirmation.
///
/// The confirmer runs at most once; every waiter shares its outcome.
pub struct EarlyDataGate {
    confirmer: Arc<dyn HandshakeConfirmer>,
    confirmed: AtomicBool,
    outcome: OnceCell<Result<(), NetError>>,
}

impl std::fmt::Debug for EarlyDataGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarlyDataGate").field("confirmed", &self.is_confirmed()).finish()
    }
}

impl EarlyDataGate {
    /// `confirmed` is false when the connection sent early data.
    pub fn new(confirmer: Arc<dyn HandshakeConfirmer>, confirmed: bool) -> Self {
        Self { confirmer, confirmed: AtomicBool::new(confirmed), outcome: OnceCell::new() }
    }

    /// A gate that never blocks.
    pub fn confirmed() -> Self {
        Self::new(Arc::new(crate::socket::transport::AlreadyConfirmed), true)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::Acquire)
    }

    /// Wait for confirmation, starting it on first use.
    pub async fn confirm(&self) -> Result<(), NetError> {
        if self.is_confirmed() {
            return Ok(());
        }
        let outcome = *self
            .outcome
            .get_or_init(|| async {
                let result = self.confirmer.confirm_handshake().await;
                tracing::debug!(ok = result.is_ok(), "handshake confirmation finished");
                result
            })
            .await;
        if outcome.is_ok() {
            self.confirmed.store(true, Ordering::Release);
        }
        outcome
    }

    /// Requests that are safe to replay may go out as early data.
    pub fn requires_confirmation(method: &str, has_body: bool) -> bool {
        let safe = matches!(method, "GET" | "HEAD" | "OPTIONS") && !has_body;
        !safe
    }
}
