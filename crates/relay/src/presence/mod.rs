// Server-side presence: which identities have at least one live connection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// Tracks live connections per identity.
///
/// An identity is online while any of its connections is registered, so a
/// user with two tabs open stays online until both close.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    state: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
    turn: Arc<Mutex<()>>,
}

impl PresenceRegistry {
    /// Record a connection. Returns `true` when the identity just came online.
    pub async fn connect(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut guard = self.state.write().await;
        let connections = guard.entry(user_id.to_string()).or_default();
        let was_offline = connections.is_empty();
        connections.insert(connection_id);
        was_offline
    }

    /// Drop a connection. Returns `true` when the identity just went offline.
    pub async fn disconnect(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut guard = self.state.write().await;
        let Some(connections) = guard.get_mut(user_id) else {
            return false;
        };
        if !connections.remove(&connection_id) {
            return false;
        }
        if connections.is_empty() {
            guard.remove(user_id);
            return true;
        }
        false
    }

    /// Online identity ids in sorted order.
    pub async fn online(&self) -> Vec<String> {
        let guard = self.state.read().await;
        guard.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state.read().await.contains_key(user_id)
    }

    /// Serializes presence changes with their broadcast so every client sees
    /// snapshots in the order the changes happened.
    pub async fn turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn).lock_owned().await
    }
}
