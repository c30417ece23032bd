use crate::Database;
use crate::models::{HistoryRow, MessageRow, UnreadPointer, UserRow, VoteRow};
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Write path of the auth collaborator; the core itself only reads users.
    pub fn insert_user(&self, user_name: &str, avatar: &str, verified: bool) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (user_name, avatar, verified) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_name, avatar, verified],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn find_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Messages --

    /// Insert a new message row. The id and the UTC timestamp are assigned
    /// here, server-side; the returned row is what was persisted.
    pub fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        message: Option<&str>,
        file_url: Option<&str>,
        id_return: Option<i64>,
        is_read: bool,
    ) -> Result<MessageRow> {
        let created_at = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_messages
                     (sender_id, receiver_id, message, file_url, id_return, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    sender_id,
                    receiver_id,
                    message,
                    file_url,
                    id_return,
                    is_read,
                    created_at
                ],
            )?;
            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                sender_id,
                receiver_id,
                message: message.map(str::to_string),
                file_url: file_url.map(str::to_string),
                id_return,
                is_read,
                edited: false,
                created_at: created_at.clone(),
            })
        })
    }

    pub fn find_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, message, file_url, id_return,
                        is_read, edited, created_at
                 FROM private_messages WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_message_row).optional()?;
            Ok(row)
        })
    }

    /// Overwrite the body and set the edited flag, but only if `sender_id`
    /// owns the row. Returns false when the row is missing or not owned.
    pub fn update_message_body(&self, id: i64, sender_id: i64, new_body: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE private_messages SET message = ?1, edited = 1
                 WHERE id = ?2 AND sender_id = ?3",
                rusqlite::params![new_body, id, sender_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Hard delete, guarded by ownership like `update_message_body`.
    pub fn delete_message(&self, id: i64, sender_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM private_messages WHERE id = ?1 AND sender_id = ?2",
                rusqlite::params![id, sender_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Set the read flag on every message from `peer_id` to `user_id` that
    /// does not already carry it. Messages flowing the other way are
    /// untouched.
    pub fn mark_read(&self, user_id: i64, peer_id: i64, read: bool) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE private_messages SET is_read = ?3
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read != ?3",
                rusqlite::params![user_id, peer_id, read],
            )?;
            Ok(changed)
        })
    }

    /// Full ordered history for a pair: both directions, oldest first,
    /// stably ordered by message id, each row joined against the sender's
    /// profile and its aggregate vote score.
    pub fn query_history(&self, user_a: i64, user_b: i64) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, m.receiver_id, m.message, m.file_url, m.id_return,
                        m.is_read, m.edited, m.created_at,
                        u.user_name, u.avatar, u.verified,
                        COALESCE(SUM(v.dir), 0) AS vote
                 FROM private_messages m
                 JOIN users u ON m.sender_id = u.id
                 LEFT JOIN message_votes v ON v.message_id = m.id
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 GROUP BY m.id
                 ORDER BY m.id ASC",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_a, user_b], |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        message: row.get(3)?,
                        file_url: row.get(4)?,
                        id_return: row.get(5)?,
                        is_read: row.get(6)?,
                        edited: row.get(7)?,
                        created_at: row.get(8)?,
                        user_name: row.get(9)?,
                        avatar: row.get(10)?,
                        verified: row.get(11)?,
                        vote: row.get(12)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Unread pointers for the notification channel: (sender, message id)
    /// per unread row addressed to this user, oldest first.
    pub fn unread_for(&self, user_id: i64) -> Result<Vec<UnreadPointer>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, id FROM private_messages
                 WHERE receiver_id = ?1 AND is_read = 0
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UnreadPointer {
                        sender_id: row.get(0)?,
                        message_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Votes --

    pub fn insert_vote(&self, user_id: i64, message_id: i64, dir: i32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_votes (user_id, message_id, dir) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, message_id, dir],
            )?;
            Ok(())
        })
    }

    pub fn delete_vote(&self, user_id: i64, message_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM message_votes WHERE user_id = ?1 AND message_id = ?2",
                rusqlite::params![user_id, message_id],
            )?;
            Ok(())
        })
    }

    pub fn find_vote(&self, user_id: i64, message_id: i64) -> Result<Option<VoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, message_id, dir FROM message_votes
                 WHERE user_id = ?1 AND message_id = ?2",
            )?;
            let row = stmt
                .query_row(rusqlite::params![user_id, message_id], |row| {
                    Ok(VoteRow {
                        user_id: row.get(0)?,
                        message_id: row.get(1)?,
                        dir: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }
}

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        message: row.get(3)?,
        file_url: row.get(4)?,
        id_return: row.get(5)?,
        is_read: row.get(6)?,
        edited: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn
        .prepare("SELECT id, user_name, avatar, verified, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                user_name: row.get(1)?,
                avatar: row.get(2)?,
                verified: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let ann = db.insert_user("ann", "https://example.com/a.png", true).unwrap();
        let bob = db.insert_user("bob", "https://example.com/b.png", false).unwrap();
        (db, ann, bob)
    }

    #[test]
    fn history_is_ordered_by_id_oldest_first() {
        let (db, ann, bob) = seeded_db();
        db.insert_message(ann, bob, Some("one"), None, None, false).unwrap();
        db.insert_message(bob, ann, Some("two"), None, None, false).unwrap();
        db.insert_message(ann, bob, Some("three"), None, None, false).unwrap();

        let history = db.query_history(ann, bob).unwrap();
        assert_eq!(history.len(), 3);
        let ids: Vec<i64> = history.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(history[0].message.as_deref(), Some("one"));
        assert_eq!(history[2].message.as_deref(), Some("three"));
        // Both directions of the pair are present
        assert_eq!(history[1].sender_id, bob);
    }

    #[test]
    fn history_excludes_other_pairs() {
        let (db, ann, bob) = seeded_db();
        let eve = db.insert_user("eve", "https://example.com/e.png", false).unwrap();
        db.insert_message(ann, bob, Some("for bob"), None, None, false).unwrap();
        db.insert_message(ann, eve, Some("for eve"), None, None, false).unwrap();

        let history = db.query_history(ann, bob).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.as_deref(), Some("for bob"));
    }

    #[test]
    fn mark_read_only_flips_peer_to_self() {
        let (db, ann, bob) = seeded_db();
        let from_ann = db.insert_message(ann, bob, Some("hi bob"), None, None, false).unwrap();
        let from_bob = db.insert_message(bob, ann, Some("hi ann"), None, None, false).unwrap();

        // Bob connects to the pair: messages ann -> bob become read.
        let changed = db.mark_read(bob, ann, true).unwrap();
        assert_eq!(changed, 1);

        assert!(db.find_message(from_ann.id).unwrap().unwrap().is_read);
        assert!(!db.find_message(from_bob.id).unwrap().unwrap().is_read);

        // Second pass is a no-op.
        assert_eq!(db.mark_read(bob, ann, true).unwrap(), 0);
    }

    #[test]
    fn vote_aggregate_in_history() {
        let (db, ann, bob) = seeded_db();
        let msg = db.insert_message(ann, bob, Some("vote on me"), None, None, false).unwrap();

        assert_eq!(db.query_history(ann, bob).unwrap()[0].vote, 0);

        db.insert_vote(bob, msg.id, 1).unwrap();
        db.insert_vote(ann, msg.id, 1).unwrap();
        assert_eq!(db.query_history(ann, bob).unwrap()[0].vote, 2);

        db.delete_vote(bob, msg.id).unwrap();
        assert_eq!(db.query_history(ann, bob).unwrap()[0].vote, 1);
        assert!(db.find_vote(ann, msg.id).unwrap().is_some());
        assert!(db.find_vote(bob, msg.id).unwrap().is_none());
    }

    #[test]
    fn edit_and_delete_are_owner_guarded() {
        let (db, ann, bob) = seeded_db();
        let msg = db.insert_message(ann, bob, Some("original"), None, None, false).unwrap();

        // Bob is not the sender
        assert!(!db.update_message_body(msg.id, bob, "hijacked").unwrap());
        assert!(!db.delete_message(msg.id, bob).unwrap());

        let row = db.find_message(msg.id).unwrap().unwrap();
        assert_eq!(row.message.as_deref(), Some("original"));
        assert!(!row.edited);

        assert!(db.update_message_body(msg.id, ann, "fixed").unwrap());
        let row = db.find_message(msg.id).unwrap().unwrap();
        assert_eq!(row.message.as_deref(), Some("fixed"));
        assert!(row.edited);

        assert!(db.delete_message(msg.id, ann).unwrap());
        assert!(db.find_message(msg.id).unwrap().is_none());
    }

    #[test]
    fn unread_pointers_for_notification() {
        let (db, ann, bob) = seeded_db();
        db.insert_message(ann, bob, Some("unread 1"), None, None, false).unwrap();
        db.insert_message(ann, bob, Some("already read"), None, None, true).unwrap();
        db.insert_message(bob, ann, Some("wrong direction"), None, None, false).unwrap();

        let unread = db.unread_for(bob).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender_id, ann);
    }
}
