use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use veranda_core::config::IdentityConfig;
use veranda_core::directory::ConversationDirectory;
use veranda_core::domain::{ConversationId, PrincipalId};
use veranda_core::errors::DomainError;

use crate::cache::{AuthToken, TokenCache, TokenClass, TokenKey, APP_SUBJECT};
use crate::provider::{BackchannelPoll, IdentityProvider};

/// Binding message shown on the user's authenticator during a backchannel
/// request.
const UPGRADE_BINDING_MESSAGE: &str = "UpgradeRoom";

/// Federated-token sharing parameter sent on calendar logins.
const FEDERATED_TOKEN_SCOPE: &str =
    "Google Calendar;https://www.googleapis.com/auth/calendar.events.owned openid";

/// Which redirect target and URL shape an authorization-code flow uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPurpose {
    Booking,
    Calendar,
}

/// One in-flight authorization-code request, keyed by its unguessable state
/// token. Consumed exactly once by the redirect callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state_token: String,
    pub conversation_id: ConversationId,
    pub principal_id: PrincipalId,
    pub scopes: Vec<String>,
    pub purpose: AuthPurpose,
}

/// Coordinates every token-acquisition flow: authorization-code (booking and
/// calendar logins), client-credentials, and CIBA backchannel requests.
/// Issued tokens land in the [`TokenCache`]; pending authorization-code
/// requests are correlated back to their conversation through the
/// [`ConversationDirectory`].
pub struct AuthorizationFlowManager {
    settings: IdentityConfig,
    cache: Arc<TokenCache>,
    directory: Arc<ConversationDirectory>,
    provider: Arc<dyn IdentityProvider>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl AuthorizationFlowManager {
    pub fn new(
        settings: IdentityConfig,
        cache: Arc<TokenCache>,
        directory: Arc<ConversationDirectory>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self { settings, cache, directory, provider, pending: Mutex::new(HashMap::new()) }
    }

    /// Mint an authorization URL and register the pending request. No
    /// network calls happen here; the flow completes later through
    /// [`Self::complete_authorization_code_flow`] when the provider redirects
    /// the browser back.
    pub async fn begin_authorization_code_flow(
        &self,
        conversation: &ConversationId,
        principal: &PrincipalId,
        scopes: &[String],
        purpose: AuthPurpose,
    ) -> String {
        let state_token = Uuid::new_v4().to_string();
        let nonce: String = Uuid::new_v4().to_string().chars().take(16).collect();
        let scope = scopes.join(" ");

        let authorization_url = match purpose {
            AuthPurpose::Booking => format!(
                "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&response_mode=query&state={}&nonce={}",
                self.settings.authorize_url,
                self.settings.client_id,
                self.settings.redirect_uri,
                scope,
                state_token,
                nonce,
            ),
            AuthPurpose::Calendar => format!(
                "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&response_mode=query&selector=calendar&reAuth=true&share_federated_token=true&federated_token_scope={}&state={}&nonce={}",
                self.settings.authorize_url,
                self.settings.client_id,
                self.settings.calendar_redirect_uri,
                scope,
                FEDERATED_TOKEN_SCOPE,
                state_token,
                nonce,
            ),
        };

        self.directory.bind_pending_state(&state_token, conversation.clone()).await;
        let mut pending = self.pending.lock().await;
        pending.insert(
            state_token.clone(),
            PendingAuthorization {
                state_token: state_token.clone(),
                conversation_id: conversation.clone(),
                principal_id: principal.clone(),
                scopes: scopes.to_vec(),
                purpose,
            },
        );

        info!(
            event_name = "auth.code_flow.begin",
            conversation_id = %conversation,
            principal_id = %principal,
            purpose = ?purpose,
            "registered pending authorization"
        );

        authorization_url
    }

    /// Resolve a redirect callback: consume the pending request (replay
    /// attempts fail with `UnknownState`), exchange the code using the
    /// redirect URI recorded at begin time, and cache the issued tokens.
    /// Returns the primary access token.
    pub async fn complete_authorization_code_flow(
        &self,
        state_token: &str,
        code: &str,
    ) -> Result<String, DomainError> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(state_token).ok_or(DomainError::UnknownState)?
        };

        let redirect_uri = match entry.purpose {
            AuthPurpose::Booking => &self.settings.redirect_uri,
            AuthPurpose::Calendar => &self.settings.calendar_redirect_uri,
        };
        let response = self.provider.exchange_code(code, &entry.scopes, redirect_uri).await?;

        let subject = entry.principal_id.0.as_str();
        self.cache
            .put(
                TokenKey::new(subject, &entry.scopes, TokenClass::Primary),
                AuthToken {
                    subject: subject.to_string(),
                    scopes: entry.scopes.clone(),
                    access_token: response.access_token.clone(),
                },
            )
            .await;
        if let Some(federated_token) = response.federated_token {
            self.cache
                .put(
                    TokenKey::new(subject, &entry.scopes, TokenClass::Federated),
                    AuthToken {
                        subject: subject.to_string(),
                        scopes: entry.scopes.clone(),
                        access_token: federated_token,
                    },
                )
                .await;
        }

        info!(
            event_name = "auth.code_flow.completed",
            conversation_id = %entry.conversation_id,
            principal_id = %entry.principal_id,
            purpose = ?entry.purpose,
            "authorization code exchanged"
        );

        Ok(response.access_token)
    }

    /// Client-credentials token for the application itself, cached per scope
    /// set. Concurrent callers may both miss and both fetch; the cache write
    /// is last-writer-wins.
    pub async fn get_app_token(&self, scopes: &[String]) -> Result<String, DomainError> {
        let key = TokenKey::new(APP_SUBJECT, scopes, TokenClass::Primary);
        if let Some(token) = self.cache.get(&key).await {
            return Ok(token.access_token);
        }

        debug!(
            event_name = "auth.app_token.cache_miss",
            scope = %scopes.join(" "),
            "fetching machine-to-machine token"
        );
        let access_token = self.provider.client_credentials(scopes).await?;
        self.cache
            .put(
                key,
                AuthToken {
                    subject: APP_SUBJECT.to_string(),
                    scopes: scopes.to_vec(),
                    access_token: access_token.clone(),
                },
            )
            .await;
        Ok(access_token)
    }

    /// Cache-only lookup of a principal's primary token. Absent until the
    /// matching authorization-code flow completes.
    pub async fn user_token(&self, principal: &PrincipalId, scopes: &[String]) -> Option<String> {
        self.cache
            .get(&TokenKey::new(&principal.0, scopes, TokenClass::Primary))
            .await
            .map(|token| token.access_token)
    }

    /// Cache-only lookup of the auxiliary token captured during a federated
    /// exchange.
    pub async fn federated_token(
        &self,
        principal: &PrincipalId,
        scopes: &[String],
    ) -> Option<String> {
        self.cache
            .get(&TokenKey::new(&principal.0, scopes, TokenClass::Federated))
            .await
            .map(|token| token.access_token)
    }

    /// Start a CIBA request for the conversation's principal. Requires a
    /// bound principal with a resolvable username claim.
    pub async fn initiate_backchannel_authorization(
        &self,
        conversation: &ConversationId,
        scopes: &[String],
    ) -> Result<String, DomainError> {
        let principal = self
            .directory
            .resolve_principal(conversation)
            .await
            .ok_or_else(|| DomainError::PrincipalUnresolved(conversation.clone()))?;
        let claims = self
            .directory
            .claims(&principal)
            .await
            .ok_or_else(|| DomainError::ClaimsUnavailable(principal.clone()))?;
        let username =
            claims.username.ok_or_else(|| DomainError::ClaimsUnavailable(principal.clone()))?;

        let auth_req_id = self
            .provider
            .start_backchannel(&username, UPGRADE_BINDING_MESSAGE, scopes)
            .await?;
        info!(
            event_name = "auth.backchannel.started",
            conversation_id = %conversation,
            principal_id = %principal,
            "backchannel authorization initiated"
        );
        Ok(auth_req_id)
    }

    /// One non-blocking probe of the backchannel request. Never retries;
    /// the upgrade coordinator owns the retry budget.
    pub async fn poll_backchannel_authorization(&self, auth_req_id: &str) -> BackchannelPoll {
        self.provider.poll_backchannel(auth_req_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use veranda_core::config::AppConfig;
    use veranda_core::directory::ConversationDirectory;
    use veranda_core::domain::{ConversationId, PrincipalId, UserClaims};
    use veranda_core::errors::DomainError;

    use crate::cache::TokenCache;
    use crate::manager::{AuthPurpose, AuthorizationFlowManager};
    use crate::provider::{ScriptedIdentityProvider, TokenResponse};

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn manager_with_provider(
        provider: Arc<ScriptedIdentityProvider>,
    ) -> (AuthorizationFlowManager, Arc<ConversationDirectory>) {
        let mut settings = AppConfig::default().identity;
        settings.client_id = "client-1".to_string();
        settings.authorize_url = "https://idp.example.com/oauth2/authorize".to_string();
        settings.redirect_uri = "https://app.example.com/callback".to_string();
        settings.calendar_redirect_uri =
            "https://app.example.com/callback/calendar".to_string();

        let directory = Arc::new(ConversationDirectory::new());
        let manager = AuthorizationFlowManager::new(
            settings,
            Arc::new(TokenCache::new()),
            Arc::clone(&directory),
            provider,
        );
        (manager, directory)
    }

    fn state_param(url: &str) -> String {
        url.split('&')
            .find_map(|pair| pair.strip_prefix("state="))
            .expect("url should carry a state parameter")
            .to_string()
    }

    #[tokio::test]
    async fn concurrent_begins_mint_unique_state_tokens() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, _directory) = manager_with_provider(provider);
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for n in 0..32 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .begin_authorization_code_flow(
                        &ConversationId::from("T1"),
                        &PrincipalId(format!("u-{n}")),
                        &["openid".to_string()],
                        AuthPurpose::Booking,
                    )
                    .await
            }));
        }

        let mut states = HashSet::new();
        for handle in handles {
            let url = handle.await.expect("begin task");
            assert!(states.insert(state_param(&url)), "state token reused");
        }
        assert_eq!(states.len(), 32);
    }

    #[tokio::test]
    async fn booking_url_carries_expected_query_parameters() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, _directory) = manager_with_provider(provider);

        let url = manager
            .begin_authorization_code_flow(
                &ConversationId::from("T1"),
                &PrincipalId::from("U1"),
                &scopes(&["openid", "create_bookings"]),
                AuthPurpose::Booking,
            )
            .await;

        assert!(url.starts_with("https://idp.example.com/oauth2/authorize?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("redirect_uri=https://app.example.com/callback"));
        assert!(url.contains("scope=openid create_bookings"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state="));
        assert!(url.contains("nonce="));
        assert!(!url.contains("share_federated_token"));
    }

    #[tokio::test]
    async fn calendar_url_adds_federation_parameters_and_redirect() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, _directory) = manager_with_provider(provider);

        let url = manager
            .begin_authorization_code_flow(
                &ConversationId::from("T1"),
                &PrincipalId::from("U1"),
                &scopes(&["openid", "create_bookings"]),
                AuthPurpose::Calendar,
            )
            .await;

        assert!(url.contains("redirect_uri=https://app.example.com/callback/calendar"));
        assert!(url.contains("selector=calendar"));
        assert!(url.contains("reAuth=true"));
        assert!(url.contains("share_federated_token=true"));
        assert!(url.contains("federated_token_scope="));
    }

    #[tokio::test]
    async fn code_exchange_caches_primary_token_and_consumes_state() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        provider
            .push_exchange_response(TokenResponse {
                access_token: "tok1".to_string(),
                federated_token: None,
            })
            .await;
        let (manager, directory) = manager_with_provider(Arc::clone(&provider));

        let user_scopes = scopes(&["openid", "create_bookings"]);
        let conversation = ConversationId::from("T1");
        let url = manager
            .begin_authorization_code_flow(
                &conversation,
                &PrincipalId::from("U1"),
                &user_scopes,
                AuthPurpose::Booking,
            )
            .await;
        let state = state_param(&url);

        // Callback can correlate the state back to its conversation.
        assert_eq!(directory.conversation_for_state(&state).await, Some(conversation));

        let token = manager
            .complete_authorization_code_flow(&state, "abc")
            .await
            .expect("exchange should succeed");
        assert_eq!(token, "tok1");
        assert_eq!(
            manager.user_token(&PrincipalId::from("U1"), &user_scopes).await,
            Some("tok1".to_string())
        );

        // Replay of the same state token must fail.
        let replay = manager.complete_authorization_code_flow(&state, "abc").await;
        assert_eq!(replay, Err(DomainError::UnknownState));
        assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_state_token_is_rejected_before_any_exchange() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, _directory) = manager_with_provider(Arc::clone(&provider));

        let result = manager.complete_authorization_code_flow("no-such-state", "abc").await;

        assert_eq!(result, Err(DomainError::UnknownState));
        assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn federated_token_is_cached_under_its_own_class() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        provider
            .push_exchange_response(TokenResponse {
                access_token: "tok-primary".to_string(),
                federated_token: Some("tok-calendar".to_string()),
            })
            .await;
        let (manager, _directory) = manager_with_provider(provider);

        let user_scopes = scopes(&["openid", "create_bookings"]);
        let url = manager
            .begin_authorization_code_flow(
                &ConversationId::from("T1"),
                &PrincipalId::from("U1"),
                &user_scopes,
                AuthPurpose::Calendar,
            )
            .await;

        manager
            .complete_authorization_code_flow(&state_param(&url), "abc")
            .await
            .expect("exchange should succeed");

        let principal = PrincipalId::from("U1");
        assert_eq!(
            manager.user_token(&principal, &user_scopes).await,
            Some("tok-primary".to_string())
        );
        assert_eq!(
            manager.federated_token(&principal, &user_scopes).await,
            Some("tok-calendar".to_string())
        );
    }

    #[tokio::test]
    async fn second_app_token_request_is_served_from_cache() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, _directory) = manager_with_provider(Arc::clone(&provider));
        let app_scopes = scopes(&["read_rooms"]);

        let first = manager.get_app_token(&app_scopes).await.expect("first fetch");
        let second = manager.get_app_token(&app_scopes).await.expect("cache hit");

        assert_eq!(first, second);
        assert_eq!(provider.credential_calls.load(Ordering::SeqCst), 1);

        // A different scope set is a distinct cache slot.
        manager.get_app_token(&scopes(&["read_bookings"])).await.expect("second scope set");
        assert_eq!(provider.credential_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backchannel_requires_a_bound_principal_with_username() {
        let provider = Arc::new(ScriptedIdentityProvider::new());
        let (manager, directory) = manager_with_provider(provider);
        let conversation = ConversationId::from("T1");
        let upgrade_scopes = scopes(&["openid", "booking_upgrade"]);

        let unbound = manager
            .initiate_backchannel_authorization(&conversation, &upgrade_scopes)
            .await;
        assert_eq!(unbound, Err(DomainError::PrincipalUnresolved(conversation.clone())));

        let principal = PrincipalId::from("u-1");
        directory.bind_principal(&conversation, principal.clone()).await;
        let no_claims = manager
            .initiate_backchannel_authorization(&conversation, &upgrade_scopes)
            .await;
        assert_eq!(no_claims, Err(DomainError::ClaimsUnavailable(principal.clone())));

        let mut claims = UserClaims::new(principal.clone());
        claims.username = Some("kisali".to_string());
        directory.store_claims(&principal, claims).await;

        let auth_req_id = manager
            .initiate_backchannel_authorization(&conversation, &upgrade_scopes)
            .await
            .expect("backchannel should start");
        assert_eq!(auth_req_id, "auth-req-kisali");
    }
}
