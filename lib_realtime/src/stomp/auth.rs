//! Bearer token source for the CONNECT frame.
//!
//! The identity provider itself is out of reach of this crate. The client only
//! needs "give me the current bearer token", asked again before every
//! (re)connect so refreshed tokens are picked up.

use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The token to send as `Authorization: Bearer <token>`, if any.
    async fn bearer_token(&self) -> Option<String>;
}

/// A token fixed at construction, e.g. from `STOMP_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
