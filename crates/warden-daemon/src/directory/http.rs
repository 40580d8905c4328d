//! REST client for the chat platform

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use warden_engine::{Directory, DirectoryError, DirectoryResult, MemberSnapshot, RoleInfo};
use warden_types::{ChannelId, MemberId, RoleId, ThreadId};

use crate::config::DirectoryConfig;
use crate::error::DaemonResult;

/// Header carrying the human-readable reason for a role change.
const AUDIT_REASON_HEADER: &str = "X-Audit-Log-Reason";

/// Directory backed by the platform's REST API.
pub struct HttpDirectory {
    client: Client,
    base_url: String,
    guild_id: u64,
    token: String,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    user: WireUser,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRateLimit {
    retry_after: f64,
}

impl WireMember {
    fn into_snapshot(self) -> DirectoryResult<MemberSnapshot> {
        let id = parse_snowflake(&self.user.id).map(MemberId::new)?;
        let roles = self
            .roles
            .iter()
            .map(|raw| parse_snowflake(raw).map(RoleId::new))
            .collect::<DirectoryResult<BTreeSet<RoleId>>>()?;
        Ok(MemberSnapshot {
            id,
            roles,
            is_bot: self.user.bot,
        })
    }
}

fn parse_snowflake(raw: &str) -> DirectoryResult<u64> {
    raw.parse()
        .map_err(|_| DirectoryError::Decode(format!("invalid snowflake {raw:?}")))
}

fn transport(e: reqwest::Error) -> DirectoryError {
    if e.is_decode() {
        DirectoryError::Decode(e.to_string())
    } else {
        DirectoryError::Transport(e.to_string())
    }
}

impl HttpDirectory {
    /// Create a client for `config`, authenticating with the bot `token`.
    pub fn new(config: &DirectoryConfig, token: String) -> DaemonResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            guild_id: config.guild_id,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    /// GET a resource; `None` when the platform answers 404.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> DirectoryResult<Option<T>> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(transport)
    }

    async fn role_write(
        &self,
        method: reqwest::Method,
        member: MemberId,
        roles: &[RoleId],
        reason: &str,
    ) -> DirectoryResult<()> {
        for role in roles {
            let path = format!(
                "/guilds/{}/members/{}/roles/{}",
                self.guild_id,
                member.get(),
                role.get()
            );
            let response = self
                .authorized(self.client.request(method.clone(), self.url(&path)))
                .header(AUDIT_REASON_HEADER, reason)
                .send()
                .await
                .map_err(transport)?;
            Self::check(response).await?;
            debug!(member_id = %member, role_id = %role, %method, "Role write acknowledged");
        }
        Ok(())
    }

    async fn check(response: Response) -> DirectoryResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .json::<WireRateLimit>()
                .await
                .map(|body| (body.retry_after * 1000.0) as u64)
                .unwrap_or(1_000);
            return Err(DirectoryError::RateLimited { retry_after_ms });
        }
        let message = response.text().await.unwrap_or_default();
        Err(DirectoryError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn fetch_member(&self, member: MemberId) -> DirectoryResult<Option<MemberSnapshot>> {
        let path = format!("/guilds/{}/members/{}", self.guild_id, member.get());
        self.get_optional::<WireMember>(&path)
            .await?
            .map(WireMember::into_snapshot)
            .transpose()
    }

    async fn fetch_role(&self, role: RoleId) -> DirectoryResult<Option<RoleInfo>> {
        let path = format!("/guilds/{}/roles", self.guild_id);
        let roles: Vec<WireRole> = self.get_optional(&path).await?.unwrap_or_default();
        let wanted = role.get().to_string();
        Ok(roles
            .into_iter()
            .find(|r| r.id == wanted)
            .map(|r| RoleInfo { id: role, name: r.name }))
    }

    async fn fetch_thread_owner(&self, thread: ThreadId) -> DirectoryResult<Option<MemberId>> {
        let path = format!("/channels/{}", thread.get());
        let Some(channel) = self.get_optional::<WireChannel>(&path).await? else {
            return Ok(None);
        };
        channel
            .owner_id
            .as_deref()
            .map(|raw| parse_snowflake(raw).map(MemberId::new))
            .transpose()
    }

    async fn add_roles(
        &self,
        member: MemberId,
        roles: &[RoleId],
        reason: &str,
    ) -> DirectoryResult<()> {
        self.role_write(reqwest::Method::PUT, member, roles, reason)
            .await
    }

    async fn remove_roles(
        &self,
        member: MemberId,
        roles: &[RoleId],
        reason: &str,
    ) -> DirectoryResult<()> {
        self.role_write(reqwest::Method::DELETE, member, roles, reason)
            .await
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> DirectoryResult<()> {
        let path = format!("/channels/{}/messages", channel.get());
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        Ok(())
    }
}
