//! Outbound delivery: channel fan-out, direct messages, typing, reactions.
//!
//! Channel traffic is first-success-wins per user: one accepted delivery
//! to any session counts that user as reached and ends the attempts on
//! their remaining sessions. Direct messages go to every session of the
//! one target. Nothing here retries, and nothing cancels an in-flight
//! request beyond the per-call timeout.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use trellis_types::access;
use trellis_types::peer::PeerEnvelope;

use crate::Node;
use crate::error::NodeError;
use crate::event::NodeEvent;
use crate::state::{DEFAULT_CHANNEL, View};

pub const PEER_ENDPOINT: &str = "/send-peer";

/// Outcome of one fan-out. `failed` lists users none of whose sessions
/// accepted the delivery; they are recorded, not retried.
#[derive(Debug)]
pub struct DeliveryReport {
    pub reached: usize,
    pub targets: usize,
    pub failed: Vec<String>,
    pub msg_id: String,
}

/// Who a typing indicator is for: the whole active channel, or one DM
/// counterpart.
#[derive(Debug, Clone)]
pub enum TypingAudience {
    Channel(String),
    Dm(String),
}

impl Node {
    /// Ordinary channel send. Pre-flight check, per-user first-success
    /// fan-out, then best-effort durable logging.
    pub async fn send_channel_message(
        &self,
        channel: &str,
        content: &str,
    ) -> Result<DeliveryReport, NodeError> {
        self.fan_out_channel(channel, content, false).await
    }

    /// Broadcast announcement: same fan-out, but flagged so receivers
    /// treat it as ephemeral. The tracker still logs it durably.
    pub async fn send_broadcast(
        &self,
        channel: &str,
        content: &str,
    ) -> Result<DeliveryReport, NodeError> {
        self.fan_out_channel(channel, content, true).await
    }

    async fn fan_out_channel(
        &self,
        channel: &str,
        content: &str,
        broadcast: bool,
    ) -> Result<DeliveryReport, NodeError> {
        // Advisory pre-flight against the freshest cache we can get. A
        // failed refresh keeps the stale cache; the tracker's own check on
        // the logging call below stays the binding one.
        if let Ok(channels) = self.tracker.list_channels().await {
            self.state.cache_permissions(channels).await;
        }
        if let Some(perm) = self.state.permission_for(channel).await {
            let denied = !access::evaluate(
                perm.is_private,
                &perm.owner,
                &perm.allowed_users,
                &self.username,
            )
            .is_granted();
            if denied {
                self.fall_back_if_active(channel).await;
                return Err(NodeError::Forbidden(format!(
                    "not a member of private channel '{}'",
                    channel
                )));
            }
        }

        let msg_id = correlation_id(&self.username, content, Utc::now());
        let envelope = if broadcast {
            PeerEnvelope::broadcast_announcement(&self.username, channel, content, &msg_id)
        } else {
            PeerEnvelope::channel_message(&self.username, channel, content, &msg_id)
        };

        let peers = self.state.peers_snapshot().await;
        let mut reached = 0;
        let mut failed = Vec::new();
        for (user, sessions) in &peers {
            let mut delivered = false;
            for (ip, port) in sessions {
                if self.deliver(ip, *port, &envelope).await {
                    delivered = true;
                    break;
                }
            }
            if delivered {
                reached += 1;
            } else {
                failed.push(user.clone());
            }
        }

        // Fire-and-forget durable log; a miss just means the entry is
        // absent from history.
        if let Err(err) = self.tracker.log_message(channel, content).await {
            warn!(channel, %err, "history log failed; entry dropped");
        }

        Ok(DeliveryReport {
            reached,
            targets: peers.len(),
            failed,
            msg_id,
        })
    }

    /// Direct message. The target is resolved from the local presence
    /// directory only; if absent, this fails without any network call.
    /// Present targets get the payload on every known session.
    pub async fn send_dm(&self, target: &str, content: &str) -> Result<DeliveryReport, NodeError> {
        let sessions = self
            .state
            .sessions_of(target)
            .await
            .ok_or_else(|| NodeError::UserOffline(target.to_string()))?;

        let msg_id = correlation_id(&self.username, content, Utc::now());
        let envelope = PeerEnvelope::direct_message(&self.username, target, content, &msg_id);

        let mut reached = 0;
        for (ip, port) in &sessions {
            if self.deliver(ip, *port, &envelope).await {
                reached += 1;
            }
        }

        if let Err(err) = self.tracker.log_dm(target, content).await {
            warn!(target, %err, "dm log failed; entry dropped");
        }

        let failed = if reached == 0 {
            vec![target.to_string()]
        } else {
            Vec::new()
        };
        Ok(DeliveryReport {
            reached,
            targets: sessions.len(),
            failed,
            msg_id,
        })
    }

    /// Fire-and-forget typing indicator to every session of the audience.
    /// No acknowledgement; receivers expire it on their own clock.
    pub async fn send_typing(&self, audience: TypingAudience) {
        let (envelope, targets) = match audience {
            TypingAudience::Channel(channel) => {
                let envelope = PeerEnvelope::typing(&self.username, &channel, false);
                (envelope, self.state.peers_snapshot().await)
            }
            TypingAudience::Dm(user) => {
                let envelope = PeerEnvelope::typing(&self.username, &user, true);
                let sessions = self.state.sessions_of(&user).await.unwrap_or_default();
                (envelope, vec![(user, sessions)])
            }
        };

        for (_, sessions) in &targets {
            for (ip, port) in sessions {
                self.deliver(ip, *port, &envelope).await;
            }
        }
    }

    /// Fire-and-forget reaction, correlated by msg_id, to every session of
    /// every known peer.
    pub async fn send_reaction(&self, channel: &str, msg_id: &str, emoji: &str) {
        let envelope = PeerEnvelope::reaction(&self.username, channel, msg_id, emoji);
        for (_, sessions) in &self.state.peers_snapshot().await {
            for (ip, port) in sessions {
                self.deliver(ip, *port, &envelope).await;
            }
        }
    }

    /// One attempt at one session. Errors and non-2xx answers are skipped
    /// silently; per-session failures are never fatal.
    async fn deliver(&self, ip: &str, port: u16, envelope: &PeerEnvelope) -> bool {
        let url = format!("http://{}:{}{}", ip, port, PEER_ENDPOINT);
        match self.peer_http.post(&url).json(envelope).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(%url, %err, "peer delivery failed");
                false
            }
        }
    }

    /// Access denial on the channel the user is looking at drops them back
    /// to the default public channel with a notice.
    pub(crate) async fn fall_back_if_active(&self, channel: &str) {
        if self.state.view().await == View::Channel(channel.to_string()) {
            self.state
                .set_view(View::Channel(DEFAULT_CHANNEL.to_string()))
                .await;
            self.emit(NodeEvent::Notice(format!(
                "access to #{} denied, returning to #{}",
                channel, DEFAULT_CHANNEL
            )));
        }
    }
}

/// Short client-side correlation id for reactions: a sha256 prefix over
/// (sender, content, send time). Not a delivery dedup key.
pub(crate) fn correlation_id(sender: &str, content: &str, sent_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(sent_at.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_short_and_input_sensitive() {
        let at = Utc::now();
        let a = correlation_id("alice", "hello", at);
        let b = correlation_id("alice", "hello!", at);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
