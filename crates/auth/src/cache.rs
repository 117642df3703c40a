use std::collections::HashMap;

use tokio::sync::RwLock;

/// Subject under which client-credentials (machine-to-machine) tokens are
/// cached.
pub const APP_SUBJECT: &str = "m2m";

/// Distinguishes the token issued directly by the identity provider from an
/// auxiliary token for a second service returned alongside it during a
/// federated exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenClass {
    Primary,
    Federated,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenKey {
    subject: String,
    scope_key: String,
    class: TokenClass,
}

impl TokenKey {
    /// Scopes are space-joined in the order supplied by the caller. Callers
    /// must agree on a stable ordering per scope set; two callers naming the
    /// same scopes in different order address different cache slots.
    pub fn new(subject: &str, scopes: &[String], class: TokenClass) -> Self {
        Self { subject: subject.to_string(), scope_key: scopes.join(" "), class }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthToken {
    pub subject: String,
    pub scopes: Vec<String>,
    pub access_token: String,
}

/// Keyed storage of issued tokens. No eviction and no expiry tracking:
/// entries live until a new flow overwrites them (last writer wins). Safe
/// under concurrent access from handler tasks and the upgrade coordinator.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<TokenKey, AuthToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: TokenKey, token: AuthToken) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(key, token);
    }

    pub async fn get(&self, key: &TokenKey) -> Option<AuthToken> {
        let tokens = self.tokens.read().await;
        tokens.get(key).cloned()
    }
}
