//! Sender lookup.
//!
//! Chat lines only carry a login name. Before a message reaches listeners the
//! sender is resolved to a full [`UserProfile`] through a [`UserResolver`].

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::auth::TokenProvider;

/// Helix base URL.
pub const HELIX_URL: &str = "https://api.twitch.tv/helix";

/// A Twitch user as returned by `GET /helix/users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
}

/// Resolves a login name to at most one profile.
///
/// `Ok(None)` means the name is unknown; the message is dropped quietly.
pub trait UserResolver: Send + Sync {
    fn resolve<'a>(&'a self, login: &'a str) -> BoxFuture<'a, Result<Option<UserProfile>>>;
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<UserProfile>,
}

/// [`UserResolver`] backed by the Helix users endpoint.
pub struct HelixUsers {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HelixUsers {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: HELIX_URL.to_string(),
            tokens,
        }
    }

    /// Point at a different API host (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(&self, login: &str) -> Result<Option<UserProfile>> {
        let token = self.tokens.access_token().await?;
        let mut req = self
            .http
            .get(format!("{}/users", self.base_url))
            .query(&[("login", login)])
            .bearer_auth(token.strip_prefix("oauth:").unwrap_or(&token));
        if let Some(client_id) = self.tokens.client_id() {
            req = req.header("Client-Id", client_id);
        }

        let resp = req.send().await.context("Failed to reach Helix")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Helix user lookup failed ({status}): {text}");
        }

        let users: UsersResponse = resp
            .json()
            .await
            .context("Failed to parse Helix users response")?;
        Ok(users.data.into_iter().next())
    }
}

impl UserResolver for HelixUsers {
    fn resolve<'a>(&'a self, login: &'a str) -> BoxFuture<'a, Result<Option<UserProfile>>> {
        Box::pin(self.fetch(login))
    }
}
