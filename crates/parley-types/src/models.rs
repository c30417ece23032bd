use serde::{Deserialize, Serialize};

/// User profile as the core sees it: read-only, owned by the auth
/// collaborator. Only the fields that end up in delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub user_name: String,
    pub avatar: String,
    pub verified: bool,
}
