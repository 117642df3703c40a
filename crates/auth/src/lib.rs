pub mod cache;
pub mod manager;
pub mod provider;

pub use cache::{AuthToken, TokenCache, TokenClass, TokenKey, APP_SUBJECT};
pub use manager::{AuthPurpose, AuthorizationFlowManager, PendingAuthorization};
pub use provider::{
    BackchannelPoll, HttpIdentityProvider, IdentityProvider, ScriptedIdentityProvider,
    TokenResponse,
};
