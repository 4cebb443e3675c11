// Presence tracking: the set of identities the server reports as online.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

pub type PresenceSet = BTreeSet<String>;

/// Holds the latest authoritative presence snapshot.
///
/// Every `getOnlineUser` broadcast replaces the set wholesale, so a peer
/// missing from one broadcast reappears with the next one. There is no
/// incremental merge.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    tx: Arc<watch::Sender<PresenceSet>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PresenceSet::new());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the tracked set with a fresh snapshot.
    pub fn replace<I>(&self, online: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.tx.send_replace(online.into_iter().collect());
    }

    /// Forget everyone. Called when the owning session closes.
    pub fn clear(&self) {
        self.tx.send_if_modified(|set| {
            if set.is_empty() {
                return false;
            }
            set.clear();
            true
        });
    }

    pub fn snapshot(&self) -> PresenceSet {
        self.tx.borrow().clone()
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.tx.borrow().contains(identity_id)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Watch for snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<PresenceSet> {
        self.tx.subscribe()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
