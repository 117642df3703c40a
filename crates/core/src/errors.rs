use thiserror::Error;

use crate::domain::{ConversationId, PrincipalId};
use crate::flows::FlowState;

/// Failure taxonomy shared by the authorization and booking layers.
///
/// Nothing here is retried internally; the CIBA pending/slow-down polling
/// loop is the one sanctioned retry path, and it lives in the upgrade
/// coordinator.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    /// Callback state token not found or already consumed. User-caused or a
    /// replay attempt.
    #[error("authorization state token is unknown or already consumed")]
    UnknownState,
    /// Network/HTTP failure talking to the identity or inventory provider.
    /// Transient; the caller may retry the whole flow from the beginning.
    #[error("provider call failed: {0}")]
    Provider(String),
    /// An action was attempted before its required flow state was recorded.
    #[error("conversation {conversation} has not reached {required:?}")]
    PreconditionNotMet { conversation: ConversationId, required: FlowState },
    /// No identity claims bound for a principal when a flow needs them.
    #[error("no identity claims stored for principal {0}")]
    ClaimsUnavailable(PrincipalId),
    /// No principal has been bound for the conversation yet.
    #[error("no principal bound for conversation {0}")]
    PrincipalUnresolved(ConversationId),
}

impl DomainError {
    /// Chat-safe message the conversational layer can surface verbatim.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownState => "This sign-in link is no longer valid. Please start over.",
            Self::Provider(_) => "A backend service is temporarily unavailable. Please retry.",
            Self::PreconditionNotMet { .. } => {
                "That step is not available yet. Complete the previous step first."
            }
            Self::ClaimsUnavailable(_) | Self::PrincipalUnresolved(_) => {
                "We could not identify you for this conversation. Please sign in again."
            }
        }
    }
}
