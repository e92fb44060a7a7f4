//! Control-plane collaborators: player status and post key lookups.
//!
//! The comment session itself only needs two things from the outside world:
//! where the comment server lives ([`CommentServer`]) and a fresh post key
//! before every comment ([`PostKeyProvider`]). [`NicoliveApi`] provides both
//! over HTTP for callers that already hold a `user_session` cookie.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::COOKIE;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ApiError;
use crate::session::ConnectionParams;

pub const DEFAULT_LIVE_BASE_URL: &str = "http://live.nicovideo.jp";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

static LIVE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lv\d+").expect("live id regex is valid"));

/// Find the first live id (`lv` followed by digits) in a URL or free text.
pub fn find_live_id(text: &str) -> Option<&str> {
    LIVE_ID_REGEX.find(text).map(|m| m.as_str())
}

/// Source of one-time post keys.
#[async_trait]
pub trait PostKeyProvider: Send + Sync {
    /// Fetch a fresh post key for `thread`. Keys are single use.
    async fn post_key(&self, thread: i64) -> Result<String, ApiError>;
}

/// Everything a session needs to know about the broadcast's comment server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentServer {
    pub params: ConnectionParams,
    /// Epoch of vpos for this broadcast.
    pub base_time: DateTime<Utc>,
    /// The caller's own user id, sent with every posted comment.
    pub user_id: String,
}

/// Subset of the `getplayerstatus` response used by this crate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerStatus {
    #[serde(rename = "@status")]
    pub status: String,
    #[serde(rename = "@time")]
    pub time: i64,
    pub stream: StreamInfo,
    pub user: UserInfo,
    pub ms: MessageServer,
    pub error: Option<StatusError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub owner_id: i64,
    pub owner_name: String,
    pub watch_count: i64,
    pub comment_count: i64,
    pub base_time: i64,
    pub open_time: i64,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub user_id: i64,
    pub nickname: String,
    pub is_premium: i64,
}

/// Comment ("message") server coordinates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageServer {
    pub addr: String,
    pub port: u16,
    pub thread: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusError {
    pub code: String,
}

impl PlayerStatus {
    /// Connection details for the broadcast's comment server.
    pub fn comment_server(&self) -> Result<CommentServer, ApiError> {
        let base_time = DateTime::from_timestamp(self.stream.base_time, 0).ok_or_else(|| {
            ApiError::other(format!("invalid base_time {}", self.stream.base_time))
        })?;

        Ok(CommentServer {
            params: ConnectionParams::new(&self.ms.addr, self.ms.port, self.ms.thread),
            base_time,
            user_id: self.user.user_id.to_string(),
        })
    }
}

/// Parse a `getplayerstatus` document, rejecting non-`ok` responses.
pub fn parse_player_status(xml: &str) -> Result<PlayerStatus, ApiError> {
    let status: PlayerStatus = quick_xml::de::from_str(xml).map_err(|e| ApiError::Xml {
        reason: e.to_string(),
    })?;

    if status.status != "ok" {
        return Err(ApiError::Status {
            status: status.status,
            code: status.error.map(|e| e.code).unwrap_or_default(),
        });
    }
    Ok(status)
}

/// Extract the key from a form encoded `getpostkey` response body.
pub fn parse_post_key(body: &str) -> Result<String, ApiError> {
    url::form_urlencoded::parse(body.trim().as_bytes())
        .find(|(name, _)| name == "postkey")
        .map(|(_, value)| value.into_owned())
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::EmptyPostKey)
}

/// HTTP client options for [`NicoliveApi`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LIVE_BASE_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP implementation of the status and post key lookups.
#[derive(Debug, Clone)]
pub struct NicoliveApi {
    client: reqwest::Client,
    base_url: Url,
    user_session: Option<String>,
}

impl NicoliveApi {
    pub fn new(config: ApiConfig, user_session: Option<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ApiError::InvalidUrl {
            input: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            user_session,
        })
    }

    /// Look up the broadcast `live_id` (e.g. `lv123456789`).
    pub async fn player_status(&self, live_id: &str) -> Result<PlayerStatus, ApiError> {
        let body = self
            .get_text("api/getplayerstatus", &[("v", live_id)])
            .await?;
        parse_player_status(&body)
    }

    /// Fetch a fresh post key for `thread`.
    pub async fn post_key(&self, thread: i64) -> Result<String, ApiError> {
        let thread = thread.to_string();
        let body = self
            .get_text("api/getpostkey", &[("thread", thread.as_str())])
            .await?;
        parse_post_key(&body)
    }

    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let mut url = self.base_url.join(path).map_err(|e| ApiError::InvalidUrl {
            input: path.to_owned(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().extend_pairs(query);

        debug!("GET {}", url.path());
        let mut request = self.client.get(url.clone());
        if let Some(session) = &self.user_session {
            request = request.header(COOKIE, format!("user_session={session}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PostKeyProvider for NicoliveApi {
    async fn post_key(&self, thread: i64) -> Result<String, ApiError> {
        NicoliveApi::post_key(self, thread).await
    }
}
