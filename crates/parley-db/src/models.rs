//! Database row types — these map directly to SQLite rows.
//! Distinct from the parley-types wire shapes to keep the store independent.

use parley_types::models::UserProfile;

pub struct UserRow {
    pub id: i64,
    pub user_name: String,
    pub avatar: String,
    pub verified: bool,
    pub created_at: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            user_name: row.user_name,
            avatar: row.avatar,
            verified: row.verified,
        }
    }
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    /// Ciphertext token, or NULL for file-only messages.
    pub message: Option<String>,
    pub file_url: Option<String>,
    pub id_return: Option<i64>,
    pub is_read: bool,
    pub edited: bool,
    pub created_at: String,
}

/// One history query result: the message row joined against the sender's
/// profile and the aggregate vote score.
pub struct HistoryRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub message: Option<String>,
    pub file_url: Option<String>,
    pub id_return: Option<i64>,
    pub is_read: bool,
    pub edited: bool,
    pub created_at: String,
    pub user_name: String,
    pub avatar: String,
    pub verified: bool,
    pub vote: i64,
}

pub struct VoteRow {
    pub user_id: i64,
    pub message_id: i64,
    pub dir: i32,
}

/// Unread-message pointer for the notification channel: who sent it and
/// which row, nothing else.
pub struct UnreadPointer {
    pub sender_id: i64,
    pub message_id: i64,
}
