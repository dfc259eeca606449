//! HTTP client side of the node: every call the tracker accepts, with the
//! session cookie captured at login and echoed on each request.

use reqwest::{Response, StatusCode, header};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;

use trellis_types::api::{
    CreateChannelRequest, DmHistoryRequest, ChannelNameRequest, LogDmRequest, LoginRequest,
    LoginResponse, LogMessageRequest, LogoutRequest, MemberRequest, RegisterRequest,
    SubmitInfoRequest, HealthResponse,
};
use trellis_types::models::{
    ChannelHistoryEntry, ChannelMembers, ChannelSummary, DmHistoryEntry, PresenceRow,
};

use crate::error::NodeError;

/// Upper bound on any single outbound call; there is no cancellation
/// beyond it and no retry behind it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TrackerClient {
    http: reqwest::Client,
    base: String,
    cookie: Option<String>,
}

impl TrackerClient {
    pub fn new(base: impl Into<String>) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            cookie: None,
        })
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), NodeError> {
        let resp = self
            .post(
                "/register",
                &RegisterRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    /// Authenticate and capture the session cookie for all later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginResponse, NodeError> {
        let resp = self
            .post(
                "/login",
                &LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        let resp = expect_success(resp).await?;

        self.cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        if self.cookie.is_none() {
            return Err(NodeError::Tracker {
                status: 200,
                message: "login reply carried no session cookie".into(),
            });
        }

        Ok(resp.json().await?)
    }

    pub async fn submit_info(&self, ip: &str, port: u16) -> Result<(), NodeError> {
        let resp = self
            .post(
                "/submit-info/",
                &SubmitInfoRequest {
                    ip: ip.to_string(),
                    port,
                },
            )
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn get_list(&self) -> Result<Vec<PresenceRow>, NodeError> {
        let resp = self.get("/get-list/").await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    /// With an endpoint, unregister only that session; with `None`,
    /// unregister everywhere.
    pub async fn logout(&self, endpoint: Option<(&str, u16)>) -> Result<(), NodeError> {
        let body = match endpoint {
            Some((ip, port)) => LogoutRequest {
                ip: Some(ip.to_string()),
                port: Some(port),
            },
            None => LogoutRequest::default(),
        };
        let resp = self.post("/logout/", &body).await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn create_channel(
        &self,
        name: &str,
        topic: &str,
        is_private: bool,
        allowed_users: &[String],
    ) -> Result<(), NodeError> {
        let resp = self
            .post(
                "/create-channel/",
                &CreateChannelRequest {
                    name: name.to_string(),
                    topic: topic.to_string(),
                    is_private,
                    allowed_users: allowed_users.to_vec(),
                },
            )
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>, NodeError> {
        let resp = self.get("/list-channels/").await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    pub async fn add_member(&self, channel: &str, username: &str) -> Result<(), NodeError> {
        let resp = self
            .post("/add-channel-member/", &member_request(channel, username))
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn remove_member(&self, channel: &str, username: &str) -> Result<(), NodeError> {
        let resp = self
            .post("/remove-channel-member/", &member_request(channel, username))
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn get_members(&self, channel: &str) -> Result<ChannelMembers, NodeError> {
        let resp = self
            .post(
                "/get-channel-members/",
                &ChannelNameRequest {
                    channel_name: channel.to_string(),
                },
            )
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    /// Durable logging half of a channel send. Callers treat failures as
    /// best-effort: the history entry is simply absent.
    pub async fn log_message(&self, channel: &str, content: &str) -> Result<(), NodeError> {
        let resp = self
            .post(
                "/log-message/",
                &LogMessageRequest {
                    channel_name: channel.to_string(),
                    content: content.to_string(),
                },
            )
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn get_history(&self, channel: &str) -> Result<Vec<ChannelHistoryEntry>, NodeError> {
        let resp = self
            .post(
                "/get-history/",
                &ChannelNameRequest {
                    channel_name: channel.to_string(),
                },
            )
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    pub async fn log_dm(&self, receiver: &str, content: &str) -> Result<(), NodeError> {
        let resp = self
            .post(
                "/log-dm/",
                &LogDmRequest {
                    receiver: receiver.to_string(),
                    content: content.to_string(),
                },
            )
            .await?;
        expect_success(resp).await?;
        Ok(())
    }

    pub async fn get_dm_history(&self, other_user: &str) -> Result<Vec<DmHistoryEntry>, NodeError> {
        let resp = self
            .post(
                "/get-dm-history/",
                &DmHistoryRequest {
                    other_user: other_user.to_string(),
                },
            )
            .await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    pub async fn health(&self) -> Result<HealthResponse, NodeError> {
        let resp = self.get("/health").await?;
        Ok(expect_success(resp).await?.json().await?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response, NodeError> {
        let mut req = self.http.post(format!("{}{}", self.base, path)).json(body);
        if let Some(cookie) = &self.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        Ok(req.send().await?)
    }

    async fn get(&self, path: &str) -> Result<Response, NodeError> {
        let mut req = self.http.get(format!("{}{}", self.base, path));
        if let Some(cookie) = &self.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        Ok(req.send().await?)
    }
}

fn member_request(channel: &str, username: &str) -> MemberRequest {
    MemberRequest {
        channel_name: channel.to_string(),
        username: username.to_string(),
    }
}

/// Map a non-2xx tracker answer onto the node error taxonomy, pulling the
/// message out of the standard error body when present.
async fn expect_success(resp: Response) -> Result<Response, NodeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(match status {
        StatusCode::UNAUTHORIZED => NodeError::Unauthorized(message),
        StatusCode::FORBIDDEN => NodeError::Forbidden(message),
        StatusCode::NOT_FOUND => NodeError::NotFound(message),
        StatusCode::CONFLICT => NodeError::Conflict(message),
        _ => NodeError::Tracker {
            status: status.as_u16(),
            message,
        },
    })
}
