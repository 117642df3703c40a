use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;
use veranda_core::config::IdentityConfig;
use veranda_core::errors::DomainError;

/// Provider response to an authorization-code exchange. A federated exchange
/// (calendar login) may carry an auxiliary token for the second service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub federated_token: Option<String>,
}

/// Outcome of a single non-blocking backchannel probe. `Pending` and
/// `SlowDown` map from the provider's `authorization_pending` / `slow_down`
/// error codes; any other failure is `Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackchannelPoll {
    Pending,
    SlowDown,
    Success(String),
    Error(String),
}

/// Synchronous-HTTP collaborator for the identity provider. Implementations
/// never retry; retry policy lives in the caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<TokenResponse, DomainError>;

    async fn client_credentials(&self, scopes: &[String]) -> Result<String, DomainError>;

    async fn start_backchannel(
        &self,
        login_hint: &str,
        binding_message: &str,
        scopes: &[String],
    ) -> Result<String, DomainError>;

    async fn poll_backchannel(&self, auth_req_id: &str) -> BackchannelPoll;
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    federated_tokens: Option<Vec<RawFederatedToken>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFederatedToken {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct RawCibaResponse {
    auth_req_id: Option<String>,
}

/// Form-encoded HTTP client for an OAuth2/CIBA identity provider.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    settings: IdentityConfig,
}

impl HttpIdentityProvider {
    pub fn new(settings: IdentityConfig) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        Ok(Self { http, settings })
    }

    async fn post_token_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, DomainError> {
        self.http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<TokenResponse, DomainError> {
        let scope = scopes.join(" ");
        let response = self
            .post_token_form(
                &self.settings.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("scope", &scope),
                    ("redirect_uri", redirect_uri),
                    ("client_id", &self.settings.client_id),
                    ("client_secret", self.settings.client_secret.expose_secret()),
                ],
            )
            .await?;

        let raw: RawTokenResponse = response
            .json()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        let access_token = raw.access_token.ok_or_else(|| {
            DomainError::Provider(
                raw.error.unwrap_or_else(|| "token response missing access_token".to_string()),
            )
        })?;
        let federated_token = raw
            .federated_tokens
            .and_then(|tokens| tokens.into_iter().next())
            .map(|token| token.access_token);

        Ok(TokenResponse { access_token, federated_token })
    }

    async fn client_credentials(&self, scopes: &[String]) -> Result<String, DomainError> {
        let scope = scopes.join(" ");
        let response = self
            .post_token_form(
                &self.settings.token_url,
                &[
                    ("grant_type", "client_credentials"),
                    ("scope", &scope),
                    ("client_id", &self.settings.client_id),
                    ("client_secret", self.settings.client_secret.expose_secret()),
                ],
            )
            .await?;

        let raw: RawTokenResponse = response
            .json()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        raw.access_token.ok_or_else(|| {
            DomainError::Provider(
                raw.error.unwrap_or_else(|| "token response missing access_token".to_string()),
            )
        })
    }

    async fn start_backchannel(
        &self,
        login_hint: &str,
        binding_message: &str,
        scopes: &[String],
    ) -> Result<String, DomainError> {
        let scope = scopes.join(" ");
        let response = self
            .post_token_form(
                &self.settings.ciba_url,
                &[
                    ("login_hint", login_hint),
                    ("binding_message", binding_message),
                    ("scope", &scope),
                    ("client_id", &self.settings.client_id),
                    ("client_secret", self.settings.client_secret.expose_secret()),
                ],
            )
            .await?;

        let raw: RawCibaResponse = response
            .json()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        raw.auth_req_id.ok_or_else(|| {
            DomainError::Provider("backchannel response missing auth_req_id".to_string())
        })
    }

    async fn poll_backchannel(&self, auth_req_id: &str) -> BackchannelPoll {
        let response = match self
            .post_token_form(
                &self.settings.token_url,
                &[
                    ("grant_type", "urn:openid:params:grant-type:ciba"),
                    ("auth_req_id", auth_req_id),
                    ("client_id", &self.settings.client_id),
                    ("client_secret", self.settings.client_secret.expose_secret()),
                ],
            )
            .await
        {
            Ok(response) => response,
            Err(error) => return BackchannelPoll::Error(error.to_string()),
        };

        let success = response.status().is_success();
        let raw: RawTokenResponse = match response.json().await {
            Ok(raw) => raw,
            Err(error) => return BackchannelPoll::Error(error.to_string()),
        };

        if success {
            match raw.access_token {
                Some(token) => BackchannelPoll::Success(token),
                None => {
                    BackchannelPoll::Error("token response missing access_token".to_string())
                }
            }
        } else {
            match raw.error.as_deref() {
                Some("authorization_pending") => BackchannelPoll::Pending,
                Some("slow_down") => BackchannelPoll::SlowDown,
                Some(other) => BackchannelPoll::Error(other.to_string()),
                None => BackchannelPoll::Error("unknown provider error".to_string()),
            }
        }
    }
}

/// Scripted in-memory provider for tests: canned token responses and a
/// scripted sequence of backchannel poll results, with call counters so
/// cache-hit behavior can be asserted.
#[derive(Default)]
pub struct ScriptedIdentityProvider {
    exchange_responses: Mutex<VecDeque<TokenResponse>>,
    poll_results: Mutex<VecDeque<BackchannelPoll>>,
    pub exchange_calls: AtomicUsize,
    pub credential_calls: AtomicUsize,
    pub backchannel_starts: AtomicUsize,
    pub poll_calls: AtomicUsize,
}

impl ScriptedIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_exchange_response(&self, response: TokenResponse) {
        self.exchange_responses.lock().await.push_back(response);
    }

    pub async fn push_poll_results(&self, results: impl IntoIterator<Item = BackchannelPoll>) {
        self.poll_results.lock().await.extend(results);
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentityProvider {
    async fn exchange_code(
        &self,
        _code: &str,
        _scopes: &[String],
        _redirect_uri: &str,
    ) -> Result<TokenResponse, DomainError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.exchange_responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| DomainError::Provider("no scripted exchange response".to_string()))
    }

    async fn client_credentials(&self, scopes: &[String]) -> Result<String, DomainError> {
        let call = self.credential_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("app-token-{}-{call}", scopes.join("+")))
    }

    async fn start_backchannel(
        &self,
        login_hint: &str,
        _binding_message: &str,
        _scopes: &[String],
    ) -> Result<String, DomainError> {
        self.backchannel_starts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("auth-req-{login_hint}"))
    }

    async fn poll_backchannel(&self, _auth_req_id: &str) -> BackchannelPoll {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        match self.poll_results.lock().await.pop_front() {
            Some(result) => result,
            None => {
                warn!(event_name = "auth.scripted_provider.exhausted", "poll script exhausted");
                BackchannelPoll::Pending
            }
        }
    }
}
