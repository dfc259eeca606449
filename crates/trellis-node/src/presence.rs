//! Periodic presence refresh, the node's only discovery mechanism.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::Node;
use crate::event::NodeEvent;

pub const PRESENCE_REFRESH_PERIOD: Duration = Duration::from_secs(5);

/// Pull the full presence snapshot on a fixed interval, diff it against
/// the previous one, and surface joined/left sets. There is no push
/// notification of presence changes and no expiry of stale rows.
pub fn spawn_presence_refresher(node: Arc<Node>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match node.tracker.get_list().await {
                Ok(rows) => {
                    let (joined, left) = node.state.replace_peers(rows, &node.username).await;
                    if !joined.is_empty() || !left.is_empty() {
                        debug!(?joined, ?left, "presence changed");
                        node.emit(NodeEvent::PresenceChanged { joined, left });
                    }
                }
                Err(err) => warn!(%err, "presence refresh failed"),
            }
        }
    })
}
