//! The peer-to-peer wire format.
//!
//! Every delivery between nodes goes through a single `POST /send-peer`
//! endpoint carrying one [`PeerEnvelope`]. The envelope keeps the flat
//! flag-style shape of the wire protocol; receivers immediately convert it
//! into the tagged [`PeerEvent`] so dispatch is an exhaustive match rather
//! than a chain of flag probes.

use serde::{Deserialize, Serialize};

/// Flat wire payload accepted by the inbound endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub sender_username: String,
    /// Channel name for channel traffic; the target username for DMs.
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub message: String,
    /// "channel" or "dm".
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub typing: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub broadcast: bool,
}

fn default_kind() -> String {
    "channel".to_string()
}

impl PeerEnvelope {
    pub fn channel_message(sender: &str, channel: &str, message: &str, msg_id: &str) -> Self {
        Self {
            sender_username: sender.to_string(),
            channel: channel.to_string(),
            message: message.to_string(),
            kind: "channel".to_string(),
            msg_id: msg_id.to_string(),
            reaction: None,
            typing: false,
            broadcast: false,
        }
    }

    /// Identical to a channel message except for the ephemeral flag:
    /// receivers display it once and never replay it from history.
    pub fn broadcast_announcement(sender: &str, channel: &str, message: &str, msg_id: &str) -> Self {
        Self {
            broadcast: true,
            ..Self::channel_message(sender, channel, message, msg_id)
        }
    }

    pub fn direct_message(sender: &str, target: &str, message: &str, msg_id: &str) -> Self {
        Self {
            sender_username: sender.to_string(),
            channel: target.to_string(),
            message: message.to_string(),
            kind: "dm".to_string(),
            msg_id: msg_id.to_string(),
            reaction: None,
            typing: false,
            broadcast: false,
        }
    }

    /// `audience` is the channel name for channel-wide typing, or the
    /// target username for a DM indicator.
    pub fn typing(sender: &str, audience: &str, dm: bool) -> Self {
        Self {
            sender_username: sender.to_string(),
            channel: audience.to_string(),
            message: String::new(),
            kind: if dm { "dm" } else { "channel" }.to_string(),
            msg_id: String::new(),
            reaction: None,
            typing: true,
            broadcast: false,
        }
    }

    pub fn reaction(sender: &str, channel: &str, msg_id: &str, emoji: &str) -> Self {
        Self {
            sender_username: sender.to_string(),
            channel: channel.to_string(),
            message: String::new(),
            kind: "channel".to_string(),
            msg_id: msg_id.to_string(),
            reaction: Some(emoji.to_string()),
            typing: false,
            broadcast: false,
        }
    }
}

/// Tagged form of a received envelope, one variant per payload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
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
    Typing {
        sender: String,
    },
    Reaction {
        sender: String,
        msg_id: String,
        emoji: String,
    },
    /// Ephemeral channel-wide announcement; shown on arrival, never
    /// replayed from history.
    BroadcastAnnouncement {
        channel: String,
        sender: String,
        content: String,
        msg_id: String,
    },
}

impl From<PeerEnvelope> for PeerEvent {
    /// Classification precedence matches the flag layout on the wire:
    /// typing, then reaction, then broadcast, then the dm/channel kind.
    fn from(env: PeerEnvelope) -> Self {
        if env.typing {
            return PeerEvent::Typing {
                sender: env.sender_username,
            };
        }
        if let Some(emoji) = env.reaction {
            return PeerEvent::Reaction {
                sender: env.sender_username,
                msg_id: env.msg_id,
                emoji,
            };
        }
        if env.broadcast {
            return PeerEvent::BroadcastAnnouncement {
                channel: env.channel,
                sender: env.sender_username,
                content: env.message,
                msg_id: env.msg_id,
            };
        }
        if env.kind == "dm" {
            return PeerEvent::DirectMessage {
                sender: env.sender_username,
                content: env.message,
                msg_id: env.msg_id,
            };
        }
        PeerEvent::ChannelMessage {
            channel: env.channel,
            sender: env.sender_username,
            content: env.message,
            msg_id: env.msg_id,
        }
    }
}
