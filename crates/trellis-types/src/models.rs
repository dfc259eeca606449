use serde::{Deserialize, Serialize};

/// One advertised (ip, port) endpoint for a username. A user may hold
/// several rows at once, one per running node session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRow {
    pub ip: String,
    pub port: u16,
    pub username: String,
}

/// Channel metadata as returned by `/list-channels/`. Doubles as the peer
/// node's cached permission record: `allowed_users` is populated only for
/// private channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub owner: String,
    pub is_private: bool,
    pub allowed_users: Vec<String>,
}

/// Owner + explicit members of a channel, from `/get-channel-members/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMembers {
    pub owner: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHistoryEntry {
    pub content: String,
    pub username: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmHistoryEntry {
    pub content: String,
    pub sender: String,
    pub receiver: String,
    pub timestamp: String,
}
