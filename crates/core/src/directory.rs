use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::{ConversationId, PrincipalId, UserClaims};

/// Bidirectional bookkeeping between conversations, authenticated principals,
/// and pending-authorization state tokens.
///
/// All maps are independent keys; nothing here blocks on another
/// conversation's state.
#[derive(Debug, Default)]
pub struct ConversationDirectory {
    principals: RwLock<HashMap<ConversationId, PrincipalId>>,
    pending_states: RwLock<HashMap<String, ConversationId>>,
    claims: RwLock<HashMap<PrincipalId, UserClaims>>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a principal to a conversation. First write wins; a later bind for
    /// the same conversation is a no-op.
    pub async fn bind_principal(&self, conversation: &ConversationId, principal: PrincipalId) {
        let mut principals = self.principals.write().await;
        principals.entry(conversation.clone()).or_insert(principal);
    }

    pub async fn resolve_principal(&self, conversation: &ConversationId) -> Option<PrincipalId> {
        let principals = self.principals.read().await;
        principals.get(conversation).cloned()
    }

    /// Record which conversation minted a state token, so a stateless
    /// redirect callback can be correlated back to its thread.
    pub async fn bind_pending_state(&self, state_token: &str, conversation: ConversationId) {
        let mut pending = self.pending_states.write().await;
        pending.insert(state_token.to_string(), conversation);
    }

    pub async fn conversation_for_state(&self, state_token: &str) -> Option<ConversationId> {
        let pending = self.pending_states.read().await;
        pending.get(state_token).cloned()
    }

    pub async fn store_claims(&self, principal: &PrincipalId, claims: UserClaims) {
        let mut stored = self.claims.write().await;
        stored.insert(principal.clone(), claims);
    }

    pub async fn claims(&self, principal: &PrincipalId) -> Option<UserClaims> {
        let stored = self.claims.read().await;
        stored.get(principal).cloned()
    }
}
