/// Database row types — these map directly to SQLite rows.
/// Distinct from the murmur-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_verified: bool,
    pub verify_code: String,
    pub verify_code_expiry: String,
    pub is_accepting_messages: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: String,
}
