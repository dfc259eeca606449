//! Peer node: HTTP client toward the tracker for identity, presence, and
//! durable history, plus a small inbound server other nodes deliver to
//! directly.

pub mod error;
pub mod event;
pub mod fanout;
pub mod inbound;
pub mod presence;
pub mod state;
pub mod tracker;

use std::net::UdpSocket;
use std::sync::Arc;

use tokio::sync::mpsc;

use trellis_types::models::{ChannelHistoryEntry, DmHistoryEntry};

pub use crate::error::NodeError;
pub use crate::event::NodeEvent;
pub use crate::fanout::{DeliveryReport, TypingAudience};
pub use crate::state::{DEFAULT_CHANNEL, NodeState, TYPING_TTL, View};
pub use crate::tracker::TrackerClient;

/// One logged-in peer node. Shared by the inbound server, the presence
/// timer, and the foreground loop; all mutable state lives in
/// [`NodeState`].
pub struct Node {
    pub username: String,
    pub state: NodeState,
    pub tracker: TrackerClient,
    pub(crate) peer_http: reqwest::Client,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl Node {
    /// Wrap an already-authenticated tracker client. The receiver carries
    /// everything the node wants shown to the user.
    pub fn new(
        tracker: TrackerClient,
        username: impl Into<String>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>), NodeError> {
        let (events, rx) = mpsc::unbounded_channel();
        let peer_http = reqwest::Client::builder()
            .timeout(tracker::REQUEST_TIMEOUT)
            .build()?;
        let node = Arc::new(Self {
            username: username.into(),
            state: NodeState::new(),
            tracker,
            peer_http,
            events,
        });
        Ok((node, rx))
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        // The receiver going away just means nobody is watching.
        let _ = self.events.send(event);
    }

    /// Switch the active view to a channel and pull its history. A
    /// Forbidden answer on what we were looking at falls back to the
    /// default public channel with a notice.
    pub async fn join_channel(&self, name: &str) -> Result<Vec<ChannelHistoryEntry>, NodeError> {
        match self.tracker.get_history(name).await {
            Ok(entries) => {
                self.state.set_view(View::Channel(name.to_string())).await;
                Ok(entries)
            }
            Err(NodeError::Forbidden(message)) => {
                // Denied on the channel we are already in (e.g. just
                // removed as a member): drop back to the default channel.
                // Denied on a channel we merely tried to enter: stay put.
                self.fall_back_if_active(name).await;
                Err(NodeError::Forbidden(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Switch the active view to a DM conversation and pull its history.
    pub async fn open_dm(&self, other_user: &str) -> Result<Vec<DmHistoryEntry>, NodeError> {
        let entries = self.tracker.get_dm_history(other_user).await?;
        self.state.set_view(View::Dm(other_user.to_string())).await;
        Ok(entries)
    }
}

/// Best-effort LAN address discovery: a connected UDP socket reveals the
/// outbound interface without sending a packet. Falls back to loopback.
pub fn local_ip() -> String {
    fn probe() -> std::io::Result<String> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("10.255.255.255", 1))?;
        Ok(socket.local_addr()?.ip().to_string())
    }
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}
