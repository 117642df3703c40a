use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one chat thread. Created on the first inbound message for a
/// thread and referenced by every store for the thread's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of an authenticated end user (the `sub` claim of the inbound
/// credential).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity claims captured once from the inbound credential and read later
/// by backchannel initiation and notification delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub subject: PrincipalId,
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserClaims {
    pub fn new(subject: PrincipalId) -> Self {
        Self { subject, username: None, email: None, extra: serde_json::Map::new() }
    }

    /// Build claims from a raw claim bag, pulling out the attributes the core
    /// reads by name and keeping the rest opaque.
    pub fn from_claim_set(
        subject: PrincipalId,
        claims: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let username = claims.get("username").and_then(|v| v.as_str()).map(str::to_string);
        let email = claims.get("email").and_then(|v| v.as_str()).map(str::to_string);
        Self { subject, username, email, extra: claims }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PrincipalId, UserClaims};

    #[test]
    fn claims_pull_username_and_email_from_claim_set() {
        let bag = json!({
            "username": "kisali",
            "email": "kisali@example.com",
            "aud": "client-1"
        });
        let serde_json::Value::Object(bag) = bag else { unreachable!() };

        let claims = UserClaims::from_claim_set(PrincipalId::from("u-1"), bag);

        assert_eq!(claims.username.as_deref(), Some("kisali"));
        assert_eq!(claims.email.as_deref(), Some("kisali@example.com"));
        assert!(claims.extra.contains_key("aud"));
    }

    #[test]
    fn claims_tolerate_missing_display_attributes() {
        let claims =
            UserClaims::from_claim_set(PrincipalId::from("u-2"), serde_json::Map::new());
        assert!(claims.username.is_none());
        assert!(claims.email.is_none());
    }
}
