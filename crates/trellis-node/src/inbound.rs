//! The node's small inbound server: one endpoint, every payload kind.
//!
//! Envelopes are classified into tagged events and dispatched through
//! [`crate::state::NodeState::apply`]; handling never contacts the
//! tracker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{error, info};

use trellis_types::peer::{PeerEnvelope, PeerEvent};

use crate::Node;
use crate::error::NodeError;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/send-peer", post(receive))
        .with_state(node)
}

/// Bind the inbound listener (an OS-assigned port when `port` is 0) and
/// serve it in the background. Returns the actual bound address.
pub async fn serve(node: Arc<Node>, port: u16) -> Result<(SocketAddr, JoinHandle<()>), NodeError> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    let app = router(node);

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "inbound server stopped");
        }
    });

    info!(%addr, "inbound peer server listening");
    Ok((addr, handle))
}

async fn receive(State(node): State<Arc<Node>>, body: Bytes) -> (StatusCode, Json<Value>) {
    let envelope: PeerEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": format!("Invalid JSON: {}", err)})),
            );
        }
    };

    let event = node.state.apply(PeerEvent::from(envelope)).await;
    node.emit(event);

    (StatusCode::OK, Json(json!({"status": "received"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use crate::TrackerClient;
    use crate::state::View;

    fn test_node() -> (Arc<Node>, tokio::sync::mpsc::UnboundedReceiver<crate::NodeEvent>) {
        // Points at a dead port; inbound handling never calls the tracker.
        let tracker = TrackerClient::new("http://127.0.0.1:9").unwrap();
        Node::new(tracker, "alice").unwrap()
    }

    async fn post_raw(app: &Router, body: &str) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri("/send-peer")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn channel_message_is_accepted_and_counted() {
        let (node, mut events) = test_node();
        let app = router(node.clone());

        let status = post_raw(
            &app,
            r#"{"sender_username":"bob","channel":"ops","message":"hi","type":"channel","msg_id":"abcd1234"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Not the active view, so it lands as unread.
        assert_eq!(node.state.view().await, View::Channel("general".into()));
        assert_eq!(node.state.unread_channel("ops").await, 1);
        assert!(matches!(
            events.recv().await,
            Some(crate::NodeEvent::ChannelMessage { .. })
        ));
    }

    #[tokio::test]
    async fn typing_flag_lands_in_the_typing_set() {
        let (node, _events) = test_node();
        let app = router(node.clone());

        let status = post_raw(
            &app,
            r#"{"sender_username":"bob","channel":"general","type":"channel","typing":true}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node.state.typing_users().await, vec!["bob"]);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_with_400() {
        let (node, _events) = test_node();
        let app = router(node);
        assert_eq!(post_raw(&app, "{not json").await, StatusCode::BAD_REQUEST);
    }
}
