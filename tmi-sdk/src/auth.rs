//! Credential plumbing.
//!
//! The client never acquires or refreshes OAuth tokens itself. It talks to a
//! [`TokenProvider`], which can be a static token from config or a refresh
//! flow owned by the application.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::Mutex;

use crate::BoxFuture;

/// OAuth scopes relevant to chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    ChatRead,
    ChatEdit,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::ChatRead => "chat:read",
            Scope::ChatEdit => "chat:edit",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the bearer token used for `PASS` and API lookups.
pub trait TokenProvider: Send + Sync {
    /// Current access token, without the `oauth:` scheme.
    fn access_token(&self) -> BoxFuture<'_, anyhow::Result<String>>;

    /// Drop any cached token so the next [`access_token`] call fetches a
    /// fresh one.
    ///
    /// [`access_token`]: TokenProvider::access_token
    fn invalidate(&self);

    /// Make sure tokens issued from now on carry `scopes`.
    fn require_scopes(&self, scopes: &[Scope]);

    /// Application client id, sent as `Client-Id` on API calls.
    fn client_id(&self) -> Option<&str> {
        None
    }
}

/// A fixed token, typically from config or the environment.
///
/// Invalidation is a no-op since there is nothing to refresh; requested scopes
/// are recorded so callers can check the token was minted with them.
pub struct StaticToken {
    token: String,
    client_id: Option<String>,
    scopes: Mutex<BTreeSet<Scope>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.strip_prefix("oauth:").unwrap_or(&token).to_string();
        Self {
            token,
            client_id: None,
            scopes: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes.lock().iter().copied().collect()
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("scopes", &*self.scopes.lock())
            .finish()
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move {
            if self.token.is_empty() {
                anyhow::bail!("static token is empty");
            }
            Ok(self.token.clone())
        })
    }

    fn invalidate(&self) {
        tracing::trace!("static token cannot be refreshed; keeping it");
    }

    fn require_scopes(&self, scopes: &[Scope]) {
        self.scopes.lock().extend(scopes.iter().copied());
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}
