/// Events the node surfaces to its frontend (the REPL, or anything else
/// driving the library). Inbound P2P traffic, presence diffs, and local
/// notices all arrive through one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    ChannelMessage {
        channel: String,
        sender: String,
        content: String,
        msg_id: String,
    },
    DirectMessage {
        sender: String,
        content: String,
        msg_id: String,
    },
    /// Ephemeral announcement: shown once, never part of history replay.
    Broadcast {
        channel: String,
        sender: String,
        content: String,
        msg_id: String,
    },
    Typing {
        sender: String,
    },
    Reaction {
        sender: String,
        msg_id: String,
        emoji: String,
    },
    /// Result of a presence refresh diff; the only discovery mechanism.
    PresenceChanged {
        joined: Vec<String>,
        left: Vec<String>,
    },
    /// Local condition worth telling the user about (e.g. forced fallback
    /// to the default channel after an access denial).
    Notice(String),
}
