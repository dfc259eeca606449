/// Database row types — these map directly to SQLite rows.
/// Distinct from the trellis-types wire models to keep the DB layer
/// independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub owner_id: String,
    pub owner_username: String,
    pub is_private: bool,
}

pub struct ChannelMessageRow {
    pub content: String,
    pub username: String,
    pub timestamp: String,
}

pub struct DmRow {
    pub content: String,
    pub sender: String,
    pub receiver: String,
    pub timestamp: String,
}

pub struct HealthCounts {
    pub peers_online: u64,
    pub total_users: u64,
    pub total_channels: u64,
    pub total_dms: u64,
}
