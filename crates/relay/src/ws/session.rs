// Live WebSocket connections and their outbound queues.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_common::protocol::ws::WsMessage;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Debug)]
struct ConnectionRecord {
    user_id: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

/// Every open socket, keyed by a per-connection id.
///
/// Socket tasks drain their own queue, so fan-out never awaits a slow peer.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

impl ConnectionRegistry {
    pub async fn register(
        &self,
        connection_id: Uuid,
        user_id: &str,
        outbound: mpsc::UnboundedSender<WsMessage>,
    ) {
        self.connections
            .write()
            .await
            .insert(connection_id, ConnectionRecord { user_id: user_id.to_string(), outbound });
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }

    pub async fn send_to_connection(&self, connection_id: Uuid, message: &WsMessage) -> bool {
        let guard = self.connections.read().await;
        guard
            .get(&connection_id)
            .is_some_and(|record| record.outbound.send(message.clone()).is_ok())
    }

    /// Queue `message` on every connection of the given identities. Returns
    /// the number of queues that accepted it.
    pub async fn send_to_users(&self, user_ids: &[&str], message: &WsMessage) -> usize {
        let recipients: Vec<_> = {
            let guard = self.connections.read().await;
            guard
                .values()
                .filter(|record| user_ids.contains(&record.user_id.as_str()))
                .map(|record| record.outbound.clone())
                .collect()
        };

        recipients.into_iter().filter(|recipient| recipient.send(message.clone()).is_ok()).count()
    }

    /// Queue `message` on every live connection.
    pub async fn broadcast(&self, message: &WsMessage) -> usize {
        let recipients: Vec<_> = {
            let guard = self.connections.read().await;
            guard.values().map(|record| record.outbound.clone()).collect()
        };

        recipients.into_iter().filter(|recipient| recipient.send(message.clone()).is_ok()).count()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
