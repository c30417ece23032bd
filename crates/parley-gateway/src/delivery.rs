use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use parley_crypto::MessageCipher;
use parley_db::Database;
use parley_db::models::{HistoryRow, MessageRow};
use parley_types::api::DeliveryRecord;
use parley_types::models::UserProfile;

use crate::registry::ConnectionRegistry;

/// Body substituted for records whose stored token fails authentication.
pub const DECRYPT_SENTINEL: &str = "[message cannot be decrypted]";

/// Run a store operation off the async runtime. The store's connection
/// guard is a blocking mutex; it must never be held on an executor thread.
pub(crate) async fn with_store<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("store task join error: {}", e))?
}

/// Composes a store write with a fan-out to the live halves of the pair.
#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    cipher: Arc<MessageCipher>,
    registry: ConnectionRegistry,
}

impl DeliveryEngine {
    pub fn new(db: Arc<Database>, cipher: Arc<MessageCipher>, registry: ConnectionRegistry) -> Self {
        Self { db, cipher, registry }
    }

    /// Persist a new message and deliver it to both halves of the live
    /// pair. The store write happens-before any push; delivery is
    /// best-effort and performs 0, 1, or 2 channel sends per call. It is
    /// not an error if neither side is live.
    pub async fn send_message(
        &self,
        body: Option<String>,
        file_url: Option<String>,
        sender: &UserProfile,
        receiver_id: i64,
        reply_to: Option<i64>,
    ) -> Result<DeliveryRecord> {
        let stored_body = match body.as_deref() {
            Some(text) => Some(self.cipher.encrypt(text)?),
            None => None,
        };

        // A row is born read iff the receiver's directed half is live: the
        // record is about to land on their socket.
        let receiver_live = self
            .registry
            .lookup((receiver_id, sender.id))
            .await
            .is_some();

        let sender_id = sender.id;
        let row = with_store(&self.db, move |db| {
            db.insert_message(
                sender_id,
                receiver_id,
                stored_body.as_deref(),
                file_url.as_deref(),
                reply_to,
                receiver_live,
            )
        })
        .await?;

        let record = record_from_row(&row, body, sender);

        for key in [(sender.id, receiver_id), (receiver_id, sender.id)] {
            if let Some(tx) = self.registry.lookup(key).await {
                if tx.send(record.clone()).is_err() {
                    debug!(from = key.0, to = key.1, "push to channel that is closing");
                }
            }
        }

        Ok(record)
    }

    /// Full decrypted history for a pair, oldest first, as wire records.
    pub async fn history(&self, user_a: i64, user_b: i64) -> Result<Vec<DeliveryRecord>> {
        let rows = with_store(&self.db, move |db| db.query_history(user_a, user_b)).await?;
        Ok(rows
            .iter()
            .map(|row| record_from_history(row, &self.cipher))
            .collect())
    }
}

/// Record for a freshly inserted row: vote starts at 0 and the plaintext
/// body is already in hand, so no decrypt round-trip.
fn record_from_row(row: &MessageRow, body: Option<String>, sender: &UserProfile) -> DeliveryRecord {
    DeliveryRecord {
        id: row.id,
        created_at: parse_created_at(&row.created_at, row.id),
        receiver_id: row.sender_id,
        message: body,
        file_url: row.file_url.clone(),
        id_return: row.id_return,
        user_name: sender.user_name.clone(),
        verified: sender.verified,
        avatar: sender.avatar.clone(),
        is_read: row.is_read,
        vote: 0,
        edited: row.edited,
    }
}

/// Record for a history row. This is the one place the wire convention for
/// `receiver_id` (author attribution) is applied, shared by the initial
/// history push and every refresh.
pub(crate) fn record_from_history(row: &HistoryRow, cipher: &MessageCipher) -> DeliveryRecord {
    let message = row.message.as_deref().map(|token| {
        cipher.decrypt(token).unwrap_or_else(|e| {
            warn!(message_id = row.id, error = %e, "failed to decrypt stored body");
            DECRYPT_SENTINEL.to_string()
        })
    });

    DeliveryRecord {
        id: row.id,
        created_at: parse_created_at(&row.created_at, row.id),
        receiver_id: row.sender_id,
        message,
        file_url: row.file_url.clone(),
        id_return: row.id_return,
        user_name: row.user_name.clone(),
        verified: row.verified,
        avatar: row.avatar.clone(),
        is_read: row.is_read,
        vote: row.vote,
        edited: row.edited,
    }
}

fn parse_created_at(raw: &str, message_id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone marker; parse as
            // naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", raw, message_id, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_crypto::keys::generate_key;
    use tokio::sync::mpsc::unbounded_channel;

    fn engine_fixture() -> (DeliveryEngine, ConnectionRegistry, Arc<Database>, UserProfile, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ann_id = db.insert_user("ann", "https://example.com/a.png", true).unwrap();
        let bob_id = db.insert_user("bob", "https://example.com/b.png", false).unwrap();

        let cipher = Arc::new(MessageCipher::new(generate_key()));
        let registry = ConnectionRegistry::new();
        let engine = DeliveryEngine::new(db.clone(), cipher, registry.clone());

        let ann = UserProfile {
            id: ann_id,
            user_name: "ann".into(),
            avatar: "https://example.com/a.png".into(),
            verified: true,
        };
        (engine, registry, db, ann, bob_id)
    }

    #[tokio::test]
    async fn persists_even_with_nobody_live() {
        let (engine, _registry, db, ann, bob_id) = engine_fixture();

        let record = engine
            .send_message(Some("hi".into()), None, &ann, bob_id, None)
            .await
            .unwrap();

        assert_eq!(record.message.as_deref(), Some("hi"));
        assert!(!record.is_read);

        let history = db.query_history(ann.id, bob_id).unwrap();
        assert_eq!(history.len(), 1);
        // Stored body is ciphertext, not the plaintext.
        assert_ne!(history[0].message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn single_live_side_gets_exactly_one_push() {
        let (engine, registry, db, ann, bob_id) = engine_fixture();

        // Only ann's own half of the pair is live.
        let (tx, mut rx) = unbounded_channel();
        registry.connect((ann.id, bob_id), tx).await;

        engine
            .send_message(Some("hi".into()), None, &ann, bob_id, None)
            .await
            .unwrap();

        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.message.as_deref(), Some("hi"));
        assert!(rx.try_recv().is_err());

        // Receiver was not live, so the row is unread.
        assert_eq!(db.unread_for(bob_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn both_live_sides_receive_the_record() {
        let (engine, registry, db, ann, bob_id) = engine_fixture();

        let (ann_tx, mut ann_rx) = unbounded_channel();
        let (bob_tx, mut bob_rx) = unbounded_channel();
        registry.connect((ann.id, bob_id), ann_tx).await;
        registry.connect((bob_id, ann.id), bob_tx).await;

        engine
            .send_message(Some("hello".into()), None, &ann, bob_id, None)
            .await
            .unwrap();

        for rx in [&mut ann_rx, &mut bob_rx] {
            let record = rx.try_recv().unwrap();
            assert_eq!(record.message.as_deref(), Some("hello"));
            assert_eq!(record.vote, 0);
            assert!(!record.edited);
            assert!(record.is_read);
            assert_eq!(record.receiver_id, ann.id); // author attribution
        }

        assert_eq!(db.query_history(ann.id, bob_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_substitutes_sentinel_for_bad_tokens() {
        let (engine, _registry, db, ann, bob_id) = engine_fixture();

        // A well-formed base64 blob that was never produced by the cipher.
        db.insert_message(
            ann.id,
            bob_id,
            Some("QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVo="),
            None,
            None,
            false,
        )
        .unwrap();

        let records = engine.history(ann.id, bob_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message.as_deref(), Some(DECRYPT_SENTINEL));
    }

    #[tokio::test]
    async fn file_only_messages_carry_no_body() {
        let (engine, _registry, _db, ann, bob_id) = engine_fixture();

        let record = engine
            .send_message(None, Some("https://files.example.com/x.png".into()), &ann, bob_id, None)
            .await
            .unwrap();

        assert!(record.message.is_none());
        assert_eq!(
            record.file_url.as_deref(),
            Some("https://files.example.com/x.png")
        );

        let history = engine.history(ann.id, bob_id).await.unwrap();
        assert!(history[0].message.is_none());
    }
}
