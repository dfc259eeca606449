//! All node-local mutable state behind one lock.
//!
//! Every activity on the node (the inbound server, the foreground loop,
//! the presence timer) goes through the snapshot/mutate methods here. The
//! raw maps never leave this module, and the lock is held only for the
//! duration of one read or mutation, never across a socket operation.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use trellis_types::models::{ChannelSummary, PresenceRow};
use trellis_types::peer::PeerEvent;

use crate::event::NodeEvent;

/// Public channel every node starts in and falls back to after an access
/// denial on its active channel.
pub const DEFAULT_CHANNEL: &str = "general";

/// Receiver-side lifetime of a typing indicator unless renewed.
pub const TYPING_TTL: Duration = Duration::from_secs(4);

/// What the user is currently looking at. Exactly one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Channel(String),
    Dm(String),
}

pub struct NodeState {
    inner: Mutex<Inner>,
}

struct Inner {
    view: View,
    /// username -> sessions in registration order.
    peers: HashMap<String, Vec<(String, u16)>>,
    channel_unread: HashMap<String, u32>,
    dm_unread: HashMap<String, u32>,
    /// username -> deadline after which the indicator is stale.
    typing: HashMap<String, Instant>,
    /// msg_id -> emoji -> users who reacted.
    reactions: HashMap<String, HashMap<String, Vec<String>>>,
    /// Channel metadata cache for the advisory pre-flight check.
    permissions: HashMap<String, ChannelSummary>,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                view: View::Channel(DEFAULT_CHANNEL.to_string()),
                peers: HashMap::new(),
                channel_unread: HashMap::new(),
                dm_unread: HashMap::new(),
                typing: HashMap::new(),
                reactions: HashMap::new(),
                permissions: HashMap::new(),
            }),
        }
    }

    pub async fn view(&self) -> View {
        self.inner.lock().await.view.clone()
    }

    /// Switch views; the unread counter for the new view resets.
    pub async fn set_view(&self, view: View) {
        let mut inner = self.inner.lock().await;
        match &view {
            View::Channel(name) => {
                inner.channel_unread.remove(name);
            }
            View::Dm(user) => {
                inner.dm_unread.remove(user);
            }
        }
        inner.view = view;
    }

    /// Swap in a fresh presence snapshot, excluding our own username, and
    /// report which users appeared and disappeared since the last one.
    pub async fn replace_peers(
        &self,
        rows: Vec<PresenceRow>,
        self_name: &str,
    ) -> (Vec<String>, Vec<String>) {
        let mut peers: HashMap<String, Vec<(String, u16)>> = HashMap::new();
        for row in rows {
            if row.username == self_name {
                continue;
            }
            peers.entry(row.username).or_default().push((row.ip, row.port));
        }

        let mut inner = self.inner.lock().await;
        let old_users: HashSet<String> = inner.peers.keys().cloned().collect();
        let new_users: HashSet<String> = peers.keys().cloned().collect();
        inner.peers = peers;

        let mut joined: Vec<String> = new_users.difference(&old_users).cloned().collect();
        let mut left: Vec<String> = old_users.difference(&new_users).cloned().collect();
        joined.sort();
        left.sort();
        (joined, left)
    }

    pub async fn sessions_of(&self, username: &str) -> Option<Vec<(String, u16)>> {
        self.inner.lock().await.peers.get(username).cloned()
    }

    pub async fn peers_snapshot(&self) -> Vec<(String, Vec<(String, u16)>)> {
        self.inner
            .lock()
            .await
            .peers
            .iter()
            .map(|(user, sessions)| (user.clone(), sessions.clone()))
            .collect()
    }

    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.inner.lock().await.peers.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn cache_permissions(&self, channels: Vec<ChannelSummary>) {
        let mut inner = self.inner.lock().await;
        inner.permissions = channels.into_iter().map(|c| (c.name.clone(), c)).collect();
    }

    pub async fn permission_for(&self, channel: &str) -> Option<ChannelSummary> {
        self.inner.lock().await.permissions.get(channel).cloned()
    }

    /// Users whose typing indicator has not yet expired, sorted. Stale
    /// entries are pruned on the way out.
    pub async fn typing_users(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.typing.retain(|_, deadline| *deadline > now);
        let mut users: Vec<String> = inner.typing.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn unread_channel(&self, channel: &str) -> u32 {
        *self
            .inner
            .lock()
            .await
            .channel_unread
            .get(channel)
            .unwrap_or(&0)
    }

    pub async fn unread_dm(&self, username: &str) -> u32 {
        *self.inner.lock().await.dm_unread.get(username).unwrap_or(&0)
    }

    /// Reaction tally for one correlation id: (emoji, reacting users).
    pub async fn reactions_for(&self, msg_id: &str) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.lock().await;
        let Some(by_emoji) = inner.reactions.get(msg_id) else {
            return Vec::new();
        };
        let mut tallies: Vec<(String, Vec<String>)> = by_emoji
            .iter()
            .map(|(emoji, users)| (emoji.clone(), users.clone()))
            .collect();
        tallies.sort_by(|a, b| a.0.cmp(&b.0));
        tallies
    }

    /// Exhaustive dispatch for one received peer event. Updates whatever
    /// local state the variant touches and hands back the event to surface.
    /// Never contacts the tracker.
    pub async fn apply(&self, event: PeerEvent) -> NodeEvent {
        let mut inner = self.inner.lock().await;
        match event {
            PeerEvent::ChannelMessage {
                channel,
                sender,
                content,
                msg_id,
            } => {
                if inner.view != View::Channel(channel.clone()) {
                    *inner.channel_unread.entry(channel.clone()).or_default() += 1;
                }
                NodeEvent::ChannelMessage {
                    channel,
                    sender,
                    content,
                    msg_id,
                }
            }
            PeerEvent::DirectMessage {
                sender,
                content,
                msg_id,
            } => {
                if inner.view != View::Dm(sender.clone()) {
                    *inner.dm_unread.entry(sender.clone()).or_default() += 1;
                }
                NodeEvent::DirectMessage {
                    sender,
                    content,
                    msg_id,
                }
            }
            PeerEvent::Typing { sender } => {
                inner.typing.insert(sender.clone(), Instant::now() + TYPING_TTL);
                NodeEvent::Typing { sender }
            }
            PeerEvent::Reaction {
                sender,
                msg_id,
                emoji,
            } => {
                let users = inner
                    .reactions
                    .entry(msg_id.clone())
                    .or_default()
                    .entry(emoji.clone())
                    .or_default();
                if !users.contains(&sender) {
                    users.push(sender.clone());
                }
                NodeEvent::Reaction {
                    sender,
                    msg_id,
                    emoji,
                }
            }
            // Ephemeral: displayed on arrival, no unread bookkeeping, and
            // never replayed from history.
            PeerEvent::BroadcastAnnouncement {
                channel,
                sender,
                content,
                msg_id,
            } => NodeEvent::Broadcast {
                channel,
                sender,
                content,
                msg_id,
            },
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
