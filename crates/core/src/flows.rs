use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::ConversationId;

/// A domain milestone recorded for a conversation. Pure value; membership in
/// a conversation's history gates which booking actions are currently legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    FetchedHotels,
    FetchedHotel,
    FetchedRoom,
    FetchedBookings,
    BookingPreviewInitiated,
    BookingPreviewCompleted,
    BookingInitiated,
    BookingCompleted,
    BookingCompletedError,
    AddedToCalendar,
    BookingAuthorized,
    CalendarAuthorized,
    ProcessingUpgrade,
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchedHotels => "FETCHED_HOTELS",
            Self::FetchedHotel => "FETCHED_HOTEL",
            Self::FetchedRoom => "FETCHED_ROOM",
            Self::FetchedBookings => "FETCHED_BOOKINGS",
            Self::BookingPreviewInitiated => "BOOKING_PREVIEW_INITIATED",
            Self::BookingPreviewCompleted => "BOOKING_PREVIEW_COMPLETED",
            Self::BookingInitiated => "BOOKING_INITIATED",
            Self::BookingCompleted => "BOOKING_COMPLETED",
            Self::BookingCompletedError => "BOOKING_COMPLETED_ERROR",
            Self::AddedToCalendar => "ADDED_TO_CALENDAR",
            Self::BookingAuthorized => "BOOKING_AUTHORIZED",
            Self::CalendarAuthorized => "CALENDAR_AUTHORIZED",
            Self::ProcessingUpgrade => "PROCESSING_UPGRADE",
        }
    }
}

#[derive(Debug, Default)]
struct ConversationLedger {
    /// Full append-ordered history; never truncated.
    history: Vec<FlowState>,
    /// Entries appended since the previous drain; cleared on each drain.
    recent: Vec<FlowState>,
}

/// Per-conversation append-only ledger of flow states.
///
/// The log records raw history; it enforces no transition rules. Duplicates
/// and out-of-order milestones are accepted as-is. Booking operations gate
/// themselves by querying membership with [`FlowStateLog::has_occurred`].
#[derive(Debug, Default)]
pub struct FlowStateLog {
    ledgers: Mutex<HashMap<ConversationId, ConversationLedger>>,
}

impl FlowStateLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a milestone to both views. Creates the ledger lazily.
    pub async fn append(&self, conversation: &ConversationId, state: FlowState) {
        let mut ledgers = self.ledgers.lock().await;
        let ledger = ledgers.entry(conversation.clone()).or_default();
        ledger.history.push(state);
        ledger.recent.push(state);
    }

    /// Full history since conversation start, in exact append order.
    pub async fn history(&self, conversation: &ConversationId) -> Vec<FlowState> {
        let ledgers = self.ledgers.lock().await;
        ledgers.get(conversation).map(|ledger| ledger.history.clone()).unwrap_or_default()
    }

    /// Entries appended since the previous drain. Clears only the drain view;
    /// the permanent history is untouched. Supports "what happened during
    /// this one request" reporting.
    pub async fn drain_recent(&self, conversation: &ConversationId) -> Vec<FlowState> {
        let mut ledgers = self.ledgers.lock().await;
        match ledgers.get_mut(conversation) {
            Some(ledger) => std::mem::take(&mut ledger.recent),
            None => Vec::new(),
        }
    }

    /// Whether `state` has ever been recorded for this conversation.
    pub async fn has_occurred(&self, conversation: &ConversationId, state: FlowState) -> bool {
        let ledgers = self.ledgers.lock().await;
        ledgers.get(conversation).is_some_and(|ledger| ledger.history.contains(&state))
    }

    /// Space-joined state names, fed to the conversational layer as context.
    pub async fn history_as_string(&self, conversation: &ConversationId) -> String {
        let ledgers = self.ledgers.lock().await;
        ledgers
            .get(conversation)
            .map(|ledger| {
                ledger.history.iter().map(FlowState::name).collect::<Vec<_>>().join(" ")
            })
            .unwrap_or_default()
    }
}
