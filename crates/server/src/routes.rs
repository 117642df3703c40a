//! Redirect callbacks and conversation-state introspection.
//!
//! - `GET /callback`                    — booking sign-in redirect target
//! - `GET /callback/calendar`           — calendar sign-in redirect target
//! - `GET /state/{conversation_id}`     — recorded flow milestones

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use veranda_auth::AuthorizationFlowManager;
use veranda_core::domain::ConversationId;
use veranda_core::errors::DomainError;
use veranda_core::flows::FlowState;
use veranda_core::{ConversationDirectory, FlowStateLog};

#[derive(Clone)]
pub struct AppState {
    pub flow_log: Arc<FlowStateLog>,
    pub directory: Arc<ConversationDirectory>,
    pub auth: Arc<AuthorizationFlowManager>,
    pub website_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackError {
    pub error: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct ConversationStateResponse {
    pub conversation_id: String,
    pub states: Vec<&'static str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/callback", get(booking_callback))
        .route("/callback/calendar", get(calendar_callback))
        .route("/state/{conversation_id}", get(conversation_state))
        .with_state(state)
}

pub async fn booking_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, (StatusCode, Json<CallbackError>)> {
    complete_callback(&state, params, FlowState::BookingAuthorized).await
}

pub async fn calendar_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, (StatusCode, Json<CallbackError>)> {
    complete_callback(&state, params, FlowState::CalendarAuthorized).await
}

/// Shared callback path: exchange the code, mark the conversation as
/// authorized, and send the browser back to the chat frontend.
async fn complete_callback(
    state: &AppState,
    params: CallbackParams,
    milestone: FlowState,
) -> Result<Redirect, (StatusCode, Json<CallbackError>)> {
    let conversation = state.directory.conversation_for_state(&params.state).await;

    if let Err(error) =
        state.auth.complete_authorization_code_flow(&params.state, &params.code).await
    {
        warn!(
            event_name = "server.callback.rejected",
            milestone = milestone.name(),
            error = %error,
            "authorization callback rejected"
        );
        let status = match error {
            DomainError::UnknownState => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        return Err((status, Json(CallbackError { error: error.user_message().to_string() })));
    }

    // The exchange can only succeed for a state token this process minted,
    // so the conversation lookup holds here.
    if let Some(conversation) = conversation {
        state.flow_log.append(&conversation, milestone).await;
        info!(
            event_name = "server.callback.completed",
            conversation_id = %conversation,
            milestone = milestone.name(),
            "authorization callback completed"
        );
    }

    Ok(Redirect::to(&format!("{}/auth_success", state.website_url)))
}

pub async fn conversation_state(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<ConversationStateResponse> {
    let conversation = ConversationId(conversation_id.clone());
    let states =
        state.flow_log.history(&conversation).await.iter().map(FlowState::name).collect();
    Json(ConversationStateResponse { conversation_id, states })
}
