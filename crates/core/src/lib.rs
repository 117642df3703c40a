pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod flows;

pub use directory::ConversationDirectory;
pub use domain::{ConversationId, PrincipalId, UserClaims};
pub use errors::DomainError;
pub use flows::{FlowState, FlowStateLog};
