use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_name   TEXT NOT NULL,
            avatar      TEXT NOT NULL DEFAULT 'https://tygjaceleczftbswxxei.supabase.co/storage/v1/object/public/image_bucket/content%20common%20chat/Avatar%20Desktop/avatar_default.jpg',
            verified    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS private_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message     TEXT,
            file_url    TEXT,
            id_return   INTEGER,
            is_read     INTEGER NOT NULL DEFAULT 0,
            edited      INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_private_messages_pair
            ON private_messages(sender_id, receiver_id);

        CREATE INDEX IF NOT EXISTS idx_private_messages_unread
            ON private_messages(receiver_id, is_read);

        CREATE TABLE IF NOT EXISTS message_votes (
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message_id  INTEGER NOT NULL REFERENCES private_messages(id) ON DELETE CASCADE,
            dir         INTEGER NOT NULL CHECK (dir <= 1),
            PRIMARY KEY (user_id, message_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
