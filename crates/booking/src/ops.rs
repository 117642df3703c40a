use std::sync::Arc;

use chrono::Days;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use veranda_auth::{AuthPurpose, AuthorizationFlowManager};
use veranda_core::directory::ConversationDirectory;
use veranda_core::domain::ConversationId;
use veranda_core::errors::DomainError;
use veranda_core::flows::{FlowState, FlowStateLog};

use crate::calendar::{CalendarClient, CalendarEvent};
use crate::inventory::{InventoryClient, NewBooking, PreviewRequest};
use crate::upgrade::UpgradeCoordinator;

const HOTEL_READ_SCOPES: [&str; 1] = ["read_hotels"];
const ROOM_READ_SCOPES: [&str; 1] = ["read_rooms"];
const BOOKING_READ_SCOPES: [&str; 1] = ["read_bookings"];
/// User-delegated scopes a booking login must grant.
const BOOKING_USER_SCOPES: [&str; 2] = ["openid", "create_bookings"];

fn scopes(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Uniform result envelope for every conversational operation: an optional
/// message to speak, an optional structured payload for the caller, and the
/// flow milestone the operation reached, so the frontend can track where the
/// conversation stands.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ToolOutput {
    pub chat_response: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub milestone: Option<FlowState>,
}

impl ToolOutput {
    pub fn chat(message: impl Into<String>) -> Self {
        Self { chat_response: Some(message.into()), payload: None, milestone: None }
    }

    pub fn payload(payload: serde_json::Value) -> Self {
        Self { chat_response: None, payload: Some(payload), milestone: None }
    }

    pub fn with_chat(mut self, message: impl Into<String>) -> Self {
        self.chat_response = Some(message.into());
        self
    }

    pub fn with_milestone(mut self, milestone: FlowState) -> Self {
        self.milestone = Some(milestone);
        self
    }
}

/// The conversational operations over inventory, booking, calendar, and
/// upgrades. Each operation acquires its own credentials, records the flow
/// milestones it reaches, and refuses to run ahead of the conversation by
/// gating on previously recorded milestones.
pub struct BookingOps {
    flow_log: Arc<FlowStateLog>,
    directory: Arc<ConversationDirectory>,
    auth: Arc<AuthorizationFlowManager>,
    inventory: Arc<dyn InventoryClient>,
    calendar: Arc<dyn CalendarClient>,
    upgrades: Arc<UpgradeCoordinator>,
}

impl BookingOps {
    pub fn new(
        flow_log: Arc<FlowStateLog>,
        directory: Arc<ConversationDirectory>,
        auth: Arc<AuthorizationFlowManager>,
        inventory: Arc<dyn InventoryClient>,
        calendar: Arc<dyn CalendarClient>,
        upgrades: Arc<UpgradeCoordinator>,
    ) -> Self {
        Self { flow_log, directory, auth, inventory, calendar, upgrades }
    }

    pub async fn fetch_hotels(
        &self,
        conversation: &ConversationId,
    ) -> Result<ToolOutput, DomainError> {
        let token = self.auth.get_app_token(&scopes(&HOTEL_READ_SCOPES)).await?;
        let hotels = self.inventory.list_hotels(&token).await?;
        self.flow_log.append(conversation, FlowState::FetchedHotels).await;
        Ok(ToolOutput::payload(json!({ "hotels": hotels }))
            .with_milestone(FlowState::FetchedHotels))
    }

    pub async fn fetch_hotel(
        &self,
        conversation: &ConversationId,
        hotel_id: i64,
    ) -> Result<ToolOutput, DomainError> {
        let token = self.auth.get_app_token(&scopes(&HOTEL_READ_SCOPES)).await?;
        let hotel = self.inventory.hotel(&token, hotel_id).await?;
        self.flow_log.append(conversation, FlowState::FetchedHotel).await;
        Ok(ToolOutput::payload(json!({ "hotel": hotel })).with_milestone(FlowState::FetchedHotel))
    }

    pub async fn fetch_room(
        &self,
        conversation: &ConversationId,
        room_id: i64,
    ) -> Result<ToolOutput, DomainError> {
        let token = self.auth.get_app_token(&scopes(&ROOM_READ_SCOPES)).await?;
        let room = self.inventory.room(&token, room_id).await?;
        self.flow_log.append(conversation, FlowState::FetchedRoom).await;
        Ok(ToolOutput::payload(json!({ "room": room })).with_milestone(FlowState::FetchedRoom))
    }

    pub async fn fetch_booking(
        &self,
        conversation: &ConversationId,
        booking_id: i64,
    ) -> Result<ToolOutput, DomainError> {
        let token = self.auth.get_app_token(&scopes(&BOOKING_READ_SCOPES)).await?;
        let booking = self.inventory.booking(&token, booking_id).await?;
        self.flow_log.append(conversation, FlowState::FetchedBookings).await;
        Ok(ToolOutput::payload(json!({ "booking": booking }))
            .with_milestone(FlowState::FetchedBookings))
    }

    /// Price a prospective stay and hand the guest a sign-in link so the
    /// booking itself can be made under their own authority.
    pub async fn booking_preview(
        &self,
        conversation: &ConversationId,
        request: PreviewRequest,
    ) -> Result<ToolOutput, DomainError> {
        let token = self.auth.get_app_token(&scopes(&ROOM_READ_SCOPES)).await?;
        let preview = self.inventory.preview(&token, &request).await?;
        if !preview.is_available {
            return Ok(ToolOutput::chat(
                "That room is not available for the selected dates. \
                 Would you like to try different dates?",
            ));
        }

        let principal = self
            .directory
            .resolve_principal(conversation)
            .await
            .ok_or_else(|| DomainError::PrincipalUnresolved(conversation.clone()))?;
        let login_url = self
            .auth
            .begin_authorization_code_flow(
                conversation,
                &principal,
                &scopes(&BOOKING_USER_SCOPES),
                AuthPurpose::Booking,
            )
            .await;
        self.flow_log.append(conversation, FlowState::BookingPreviewInitiated).await;

        Ok(ToolOutput::payload(json!({ "preview": preview }))
            .with_chat(format!(
                "Your stay would total {}. To confirm the booking, please sign in here: {}",
                preview.total_price, login_url,
            ))
            .with_milestone(FlowState::BookingPreviewInitiated))
    }

    /// Create the booking under the guest's delegated token. Requires a
    /// completed preview and a completed booking sign-in.
    pub async fn create_booking(
        &self,
        conversation: &ConversationId,
        request: NewBooking,
    ) -> Result<ToolOutput, DomainError> {
        if !self.flow_log.has_occurred(conversation, FlowState::BookingPreviewInitiated).await {
            return Err(DomainError::PreconditionNotMet {
                conversation: conversation.clone(),
                required: FlowState::BookingPreviewInitiated,
            });
        }
        self.flow_log.append(conversation, FlowState::BookingPreviewCompleted).await;

        let principal = self
            .directory
            .resolve_principal(conversation)
            .await
            .ok_or_else(|| DomainError::PrincipalUnresolved(conversation.clone()))?;
        let user_scopes = scopes(&BOOKING_USER_SCOPES);
        let Some(token) = self.auth.user_token(&principal, &user_scopes).await else {
            return Err(DomainError::PreconditionNotMet {
                conversation: conversation.clone(),
                required: FlowState::BookingAuthorized,
            });
        };

        self.flow_log.append(conversation, FlowState::BookingInitiated).await;
        let booking = match self.inventory.create_booking(&token, &request).await {
            Ok(booking) => booking,
            Err(error) => {
                warn!(
                    event_name = "booking.create.failed",
                    conversation_id = %conversation,
                    error = %error,
                    "inventory rejected the booking"
                );
                self.flow_log.append(conversation, FlowState::BookingCompletedError).await;
                return Ok(ToolOutput::chat(error.user_message())
                    .with_milestone(FlowState::BookingCompletedError));
            }
        };
        self.flow_log.append(conversation, FlowState::BookingCompleted).await;
        info!(
            event_name = "booking.create.completed",
            conversation_id = %conversation,
            booking_id = booking.id,
            "booking confirmed"
        );

        // Offer the calendar sign-in right away; the federated token it
        // yields is what add_to_calendar needs later.
        let calendar_url = self
            .auth
            .begin_authorization_code_flow(
                conversation,
                &principal,
                &user_scopes,
                AuthPurpose::Calendar,
            )
            .await;

        Ok(ToolOutput::payload(json!({ "booking": booking }))
            .with_chat(format!(
                "Booking {} at {} is confirmed. \
                 To add the stay to your Google Calendar, sign in here: {}",
                booking.id, booking.hotel_name, calendar_url,
            ))
            .with_milestone(FlowState::BookingCompleted))
    }

    /// Put the stay on the guest's calendar using the federated token from a
    /// completed calendar sign-in. The event spans check-in to the morning
    /// after check-out, the calendar API's exclusive-end convention.
    pub async fn add_to_calendar(
        &self,
        conversation: &ConversationId,
        booking_id: i64,
    ) -> Result<ToolOutput, DomainError> {
        let principal = self
            .directory
            .resolve_principal(conversation)
            .await
            .ok_or_else(|| DomainError::PrincipalUnresolved(conversation.clone()))?;
        let Some(federated_token) =
            self.auth.federated_token(&principal, &scopes(&BOOKING_USER_SCOPES)).await
        else {
            return Err(DomainError::PreconditionNotMet {
                conversation: conversation.clone(),
                required: FlowState::CalendarAuthorized,
            });
        };

        let app_token = self.auth.get_app_token(&scopes(&BOOKING_READ_SCOPES)).await?;
        let booking = self.inventory.booking(&app_token, booking_id).await?;
        let end = booking
            .check_out
            .checked_add_days(Days::new(1))
            .ok_or_else(|| DomainError::Provider("check-out date overflow".to_string()))?;
        let event = CalendarEvent {
            summary: format!("Stay at {}", booking.hotel_name),
            start: booking.check_in,
            end,
        };

        let link = self.calendar.create_event(&federated_token, &event).await?;
        self.flow_log.append(conversation, FlowState::AddedToCalendar).await;
        Ok(ToolOutput::payload(json!({ "event_link": link }))
            .with_chat(format!("Your stay is on your calendar: {link}"))
            .with_milestone(FlowState::AddedToCalendar))
    }

    /// Kick off the background upgrade approval and acknowledge immediately.
    /// The answer arrives out of band once the guest approves or the poll
    /// budget runs out.
    pub async fn request_upgrade(
        &self,
        conversation: &ConversationId,
        booking_id: i64,
        room_id: i64,
    ) -> Result<ToolOutput, DomainError> {
        self.upgrades.schedule(conversation.clone(), booking_id, room_id);
        self.flow_log.append(conversation, FlowState::ProcessingUpgrade).await;
        Ok(ToolOutput::chat(
            "Your upgrade request is being processed. \
             Please approve it on your authenticator when prompted; \
             we will notify you as soon as it goes through.",
        )
        .with_milestone(FlowState::ProcessingUpgrade))
    }
}
