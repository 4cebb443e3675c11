// Identity provider handle.
//
// The application's auth layer owns the real principal; this handle is the
// narrow seam the sync runtime watches so it can rebind the session when the
// principal logs in, logs out, or switches.

use std::sync::Arc;

use murmur_common::types::Identity;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct IdentityProvider {
    tx: Arc<watch::Sender<Option<Identity>>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_identity(identity: Identity) -> Self {
        let provider = Self::new();
        provider.login(identity);
        provider
    }

    /// Make `identity` current. Watchers are notified even when the id is
    /// unchanged; the runtime treats a same-id login as a no-op.
    pub fn login(&self, identity: Identity) {
        self.tx.send_replace(Some(identity));
    }

    pub fn logout(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}
