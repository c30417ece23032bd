use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc::UnboundedSender};
use uuid::Uuid;

use parley_types::api::DeliveryRecord;

/// One directed half of a two-party conversation: (from user, to user).
/// Each live socket owns exactly one ordered half, so the registry keys on
/// the ordered tuple rather than an unordered set.
pub type PairKey = (i64, i64);

struct PairEntry {
    conn_id: Uuid,
    tx: UnboundedSender<DeliveryRecord>,
}

/// In-memory mapping from pair keys to live conversation channels.
/// The registry is the sole owner of an entry between connect and
/// disconnect; the delivery engine only clones senders out of it.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<PairKey, PairEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under an ordered pair key, overwriting any
    /// existing entry for that exact key (last-connect-wins). Returns the
    /// connection tag the session must present on disconnect.
    pub async fn connect(&self, pair: PairKey, tx: UnboundedSender<DeliveryRecord>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.write().await.insert(pair, PairEntry { conn_id, tx });
        conn_id
    }

    /// Remove the entry, but only if `conn_id` still owns it — a session
    /// that was overwritten by a newer connection must not evict the newer
    /// channel on its way out. Idempotent; never errors on a missing key.
    pub async fn disconnect(&self, pair: PairKey, conn_id: Uuid) {
        let mut guard = self.inner.write().await;
        if guard.get(&pair).is_some_and(|entry| entry.conn_id == conn_id) {
            guard.remove(&pair);
        }
    }

    /// Non-blocking presence check; clones the sender out of the map.
    pub async fn lookup(&self, pair: PairKey) -> Option<UnboundedSender<DeliveryRecord>> {
        self.inner.read().await.get(&pair).map(|entry| entry.tx.clone())
    }
}

/// Independent presence map for notification channels, keyed by single
/// user id. The notification session polls the store itself, so only the
/// connection tag is tracked here.
#[derive(Default, Clone)]
pub struct NotifyRegistry {
    inner: Arc<RwLock<HashMap<i64, Uuid>>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, user_id: i64) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.write().await.insert(user_id, conn_id);
        conn_id
    }

    pub async fn disconnect(&self, user_id: i64, conn_id: Uuid) {
        let mut guard = self.inner.write().await;
        if guard.get(&user_id).is_some_and(|tag| *tag == conn_id) {
            guard.remove(&user_id);
        }
    }

    pub async fn is_connected(&self, user_id: i64) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }
}
